//! Reverse arbitrage: the coin carries a kimchi premium on the KRW venue.
//!
//! Buy the coin on Binance with USDT, move it on-chain to Upbit, sell it
//! for KRW, buy USDT back with the proceeds, and return the USDT to
//! Binance. Mirrors the forward driver over the same state enum.

use crate::{
    forward::route_failure, wait_for_deposit, StrategyEnv, StrategyError, StrategyResult, Trade,
    TradeState, TradeStep,
};
use kimp_core::{Opportunity, Venue};
use kimp_venues::{with_retry, BuyFunds};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::info;

/// Buffer over the converted trade size held in USDT before entry (1%).
const USDT_BUFFER: Decimal = Decimal::from_parts(101, 0, 0, false, 2);

/// Fee shave applied to the entry quantity so the buy cannot overdraw
/// the reserved USDT.
const ENTRY_SHAVE: Decimal = Decimal::from_parts(995, 0, 0, false, 3);

pub struct ReverseStrategy {
    env: StrategyEnv,
}

impl ReverseStrategy {
    pub fn new(env: StrategyEnv) -> Self {
        Self { env }
    }

    /// Drive one opportunity to a terminal trade record.
    pub async fn execute(
        &self,
        opportunity: Opportunity,
        mut shutdown: watch::Receiver<bool>,
    ) -> Trade {
        let mut trade = Trade::new(opportunity);
        info!(
            "Starting reverse arbitrage {}: {} KRW at {:.4}% premium",
            trade.id, trade.opportunity.sized_amount_krw, trade.opportunity.premium_pct
        );

        while !trade.is_terminal() {
            if *shutdown.borrow() {
                route_failure(&self.env, &mut trade, StrategyError::Cancelled).await;
                break;
            }
            let result = match trade.state {
                TradeState::Start => self.preflight(&mut trade).await,
                TradeState::BuyingUsdtSide => self.buy_coin(&mut trade).await,
                TradeState::XferOut => self.transfer_out(&mut trade).await,
                TradeState::AwaitXferOut => {
                    self.await_transfer_out(&mut trade, &mut shutdown).await
                }
                TradeState::SellingKrw => self.sell_coin(&mut trade).await,
                TradeState::ConvertingHome => self.convert_home(&mut trade).await,
                TradeState::XferHome => self.transfer_home(&mut trade).await,
                TradeState::AwaitXferHome => {
                    self.await_transfer_home(&mut trade, &mut shutdown).await
                }
                TradeState::Completed | TradeState::Recovery => break,
                TradeState::BuyingKrw | TradeState::SellingUsdtSide => {
                    route_failure(
                        &self.env,
                        &mut trade,
                        StrategyError::Preflight("illegal reverse state".into()),
                    )
                    .await;
                    break;
                }
            };
            match result {
                Ok(next) => {
                    if !trade.is_terminal() {
                        trade.advance(next);
                    }
                }
                Err(err) => route_failure(&self.env, &mut trade, err).await,
            }
        }

        info!(
            "Reverse arbitrage {} finished: {:?}, profit {} KRW",
            trade.id, trade.outcome, trade.realized_profit_krw
        );
        trade
    }

    /// Require USDT on Binance covering the converted size plus buffer.
    async fn preflight(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        let rate = self.env.rates.current().await?;
        let required_usdt =
            trade.opportunity.sized_amount_krw / rate.rate * USDT_BUFFER;
        let retries = self.env.config.max_retries;
        let balance = with_retry("balance", retries, || self.env.binance.balance("USDT")).await?;
        if balance.free < required_usdt {
            return Err(StrategyError::Preflight(format!(
                "Insufficient USDT balance: required {required_usdt}, available {}",
                balance.free
            )));
        }
        trade.record(
            TradeStep::new(TradeState::Start, "USDT")
                .on_venue(Venue::Binance)
                .with_amount(required_usdt)
                .with_detail(format!("pre-flight at rate {}", rate.rate)),
        );
        Ok(TradeState::BuyingUsdtSide)
    }

    /// Market-buy the coin on Binance with the reserved USDT.
    async fn buy_coin(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::BuyingUsdtSide) {
            return Ok(TradeState::XferOut);
        }
        let symbol = trade.opportunity.symbol.clone();
        let required_usdt = trade
            .step(TradeState::Start)
            .map(|step| step.amount)
            .ok_or_else(|| StrategyError::Preflight("missing pre-flight record".into()))?;
        let retries = self.env.config.max_retries;
        let price =
            with_retry("ticker", retries, || self.env.binance.ticker(&symbol)).await?;
        let quantity = required_usdt / price * ENTRY_SHAVE;
        let fill = self
            .env
            .checked_buy(Venue::Binance, &symbol, BuyFunds::Base(quantity))
            .await?;
        trade.record(
            TradeStep::new(TradeState::BuyingUsdtSide, &symbol)
                .on_venue(Venue::Binance)
                .with_amount(fill.executed_qty)
                .with_order_id(&fill.order_id)
                .with_detail(format!("avg price {}", fill.avg_price())),
        );
        Ok(TradeState::XferOut)
    }

    /// Withdraw the coin to Upbit over its preferred network.
    async fn transfer_out(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::XferOut) {
            return Ok(TradeState::AwaitXferOut);
        }
        let symbol = trade.opportunity.symbol.clone();
        let retries = self.env.config.max_retries;
        let balance =
            with_retry("balance", retries, || self.env.binance.balance(&symbol)).await?;
        let amount = self.env.coin_transfer_amount(balance.free);
        let baseline = with_retry("balance", retries, || self.env.upbit.balance(&symbol))
            .await?
            .total();
        let (withdrawal_id, address) = self
            .env
            .withdraw_to_counterpart(Venue::Binance, &symbol, amount)
            .await?;
        trade.record(
            TradeStep::new(TradeState::XferOut, &symbol)
                .on_venue(Venue::Binance)
                .with_amount(amount)
                .with_order_id(&withdrawal_id)
                .with_baseline(baseline)
                .with_detail(format!("to {address}")),
        );
        Ok(TradeState::AwaitXferOut)
    }

    /// Poll Upbit until the coin deposit lands.
    async fn await_transfer_out(
        &self,
        trade: &mut Trade,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StrategyResult<TradeState> {
        let symbol = trade.opportunity.symbol.clone();
        let step = trade
            .step(TradeState::XferOut)
            .cloned()
            .ok_or_else(|| StrategyError::Preflight("missing xfer_out record".into()))?;
        let observed = wait_for_deposit(
            &self.env.upbit,
            &symbol,
            step.amount,
            step.baseline.unwrap_or_default(),
            self.env.config.transfer_wait(),
            shutdown,
        )
        .await?;
        trade.record(
            TradeStep::new(TradeState::AwaitXferOut, &symbol)
                .on_venue(Venue::Upbit)
                .with_amount(observed)
                .with_detail("deposit confirmed"),
        );
        Ok(TradeState::SellingKrw)
    }

    /// Sell the full coin balance on Upbit for KRW.
    async fn sell_coin(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::SellingKrw) {
            return Ok(TradeState::ConvertingHome);
        }
        let symbol = trade.opportunity.symbol.clone();
        let retries = self.env.config.max_retries;
        let qty = with_retry("balance", retries, || self.env.upbit.balance(&symbol))
            .await?
            .free;
        let fill = self.env.checked_sell(Venue::Upbit, &symbol, qty).await?;
        let proceeds_krw = fill.executed_quote - fill.fee;
        trade.record(
            TradeStep::new(TradeState::SellingKrw, "KRW")
                .on_venue(Venue::Upbit)
                .with_amount(proceeds_krw)
                .with_order_id(&fill.order_id)
                .with_detail(format!("sold {} {}", fill.executed_qty, symbol)),
        );
        Ok(TradeState::ConvertingHome)
    }

    /// Buy USDT back on Upbit with the KRW proceeds.
    async fn convert_home(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::ConvertingHome) {
            return Ok(TradeState::XferHome);
        }
        let proceeds_krw = trade
            .step(TradeState::SellingKrw)
            .map(|step| step.amount)
            .ok_or_else(|| StrategyError::Preflight("missing selling_krw record".into()))?;
        let fill = self
            .env
            .checked_buy(Venue::Upbit, "USDT", BuyFunds::Quote(proceeds_krw))
            .await?;
        trade.record(
            TradeStep::new(TradeState::ConvertingHome, "USDT")
                .on_venue(Venue::Upbit)
                .with_amount(fill.executed_qty)
                .with_order_id(&fill.order_id)
                .with_detail(format!("spent {} KRW", proceeds_krw)),
        );
        Ok(TradeState::XferHome)
    }

    /// Withdraw the USDT back to Binance.
    async fn transfer_home(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::XferHome) {
            return Ok(TradeState::AwaitXferHome);
        }
        let retries = self.env.config.max_retries;
        let usdt = with_retry("balance", retries, || self.env.upbit.balance("USDT"))
            .await?
            .free;
        let amount = self.env.usdt_transfer_amount(usdt);
        if amount <= Decimal::ZERO {
            return Err(StrategyError::Preflight(format!(
                "USDT balance {usdt} below transfer reserve"
            )));
        }
        let baseline = with_retry("balance", retries, || self.env.binance.balance("USDT"))
            .await?
            .total();
        let (withdrawal_id, address) = self
            .env
            .withdraw_to_counterpart(Venue::Upbit, "USDT", amount)
            .await?;
        trade.record(
            TradeStep::new(TradeState::XferHome, "USDT")
                .on_venue(Venue::Upbit)
                .with_amount(amount)
                .with_order_id(&withdrawal_id)
                .with_baseline(baseline)
                .with_detail(format!("to {address}")),
        );
        Ok(TradeState::AwaitXferHome)
    }

    /// Poll Binance for the returning USDT, then realize the cycle.
    async fn await_transfer_home(
        &self,
        trade: &mut Trade,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StrategyResult<TradeState> {
        let step = trade
            .step(TradeState::XferHome)
            .cloned()
            .ok_or_else(|| StrategyError::Preflight("missing xfer_home record".into()))?;
        let observed = wait_for_deposit(
            &self.env.binance,
            "USDT",
            step.amount,
            step.baseline.unwrap_or_default(),
            self.env.config.transfer_wait(),
            shutdown,
        )
        .await?;
        trade.record(
            TradeStep::new(TradeState::AwaitXferHome, "USDT")
                .on_venue(Venue::Binance)
                .with_amount(observed)
                .with_detail("deposit confirmed"),
        );

        let spent_usdt = trade
            .step(TradeState::Start)
            .map(|step| step.amount)
            .unwrap_or_default();
        let profit_usdt = observed - spent_usdt;
        // Realize in KRW at the current rate; fall back to the entry-implied
        // rate so a rate outage cannot fail a finished cycle.
        let rate = match self.env.rates.current().await {
            Ok(rate) => rate.rate,
            Err(_) if !spent_usdt.is_zero() => {
                trade.opportunity.sized_amount_krw / spent_usdt * USDT_BUFFER
            }
            Err(_) => Decimal::ZERO,
        };
        trade.complete(profit_usdt * rate);
        Ok(TradeState::Completed)
    }
}
