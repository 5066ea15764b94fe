//! Forward arbitrage: the coin trades at a discount on the KRW venue.
//!
//! Buy on Upbit with KRW, move the coin on-chain to Binance, sell it for
//! USDT, move the USDT back to Upbit, and sell it for KRW. The driver is a
//! plain match on [`TradeState`] until a terminal value; each step skips
//! itself when its success artifact is already recorded.

use crate::{
    wait_for_deposit, StrategyEnv, StrategyError, StrategyResult, Trade, TradeState, TradeStep,
};
use kimp_core::{Opportunity, Venue};
use kimp_venues::{with_retry, BuyFunds};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct ForwardStrategy {
    env: StrategyEnv,
}

impl ForwardStrategy {
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
            "Starting forward arbitrage {}: {} KRW at {:.4}% premium",
            trade.id, trade.opportunity.sized_amount_krw, trade.opportunity.premium_pct
        );

        while !trade.is_terminal() {
            if *shutdown.borrow() {
                route_failure(&self.env, &mut trade, StrategyError::Cancelled).await;
                break;
            }
            let result = match trade.state {
                TradeState::Start => self.preflight(&mut trade).await,
                TradeState::BuyingKrw => self.buy_coin(&mut trade).await,
                TradeState::XferOut => self.transfer_out(&mut trade).await,
                TradeState::AwaitXferOut => {
                    self.await_transfer_out(&mut trade, &mut shutdown).await
                }
                TradeState::SellingUsdtSide => self.sell_coin(&mut trade).await,
                TradeState::XferHome => self.transfer_home(&mut trade).await,
                TradeState::AwaitXferHome => {
                    self.await_transfer_home(&mut trade, &mut shutdown).await
                }
                TradeState::ConvertingHome => self.convert_home(&mut trade).await,
                TradeState::Completed | TradeState::Recovery => break,
                // Reverse-only states are unreachable under this driver.
                TradeState::BuyingUsdtSide | TradeState::SellingKrw => {
                    route_failure(
                        &self.env,
                        &mut trade,
                        StrategyError::Preflight("illegal forward state".into()),
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
            "Forward arbitrage {} finished: {:?}, profit {} KRW",
            trade.id, trade.outcome, trade.realized_profit_krw
        );
        trade
    }

    /// Verify the KRW balance covers the sized amount.
    async fn preflight(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        let sized = trade.opportunity.sized_amount_krw;
        let retries = self.env.config.max_retries;
        let balance = with_retry("balance", retries, || self.env.upbit.balance("KRW")).await?;
        if balance.free < sized {
            return Err(StrategyError::Preflight(format!(
                "Insufficient KRW balance: {} < {}",
                balance.free, sized
            )));
        }
        trade.record(
            TradeStep::new(TradeState::Start, "KRW")
                .on_venue(Venue::Upbit)
                .with_amount(sized)
                .with_detail("pre-flight balance verified"),
        );
        Ok(TradeState::BuyingKrw)
    }

    /// Market-buy the coin on Upbit for the sized KRW amount.
    async fn buy_coin(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::BuyingKrw) {
            return Ok(TradeState::XferOut);
        }
        let symbol = trade.opportunity.symbol.clone();
        let fill = self
            .env
            .checked_buy(
                Venue::Upbit,
                &symbol,
                BuyFunds::Quote(trade.opportunity.sized_amount_krw),
            )
            .await?;
        trade.record(
            TradeStep::new(TradeState::BuyingKrw, &symbol)
                .on_venue(Venue::Upbit)
                .with_amount(fill.executed_qty)
                .with_order_id(&fill.order_id)
                .with_detail(format!("avg price {}", fill.avg_price())),
        );
        Ok(TradeState::XferOut)
    }

    /// Withdraw the bought coin to Binance over its preferred network.
    async fn transfer_out(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::XferOut) {
            return Ok(TradeState::AwaitXferOut);
        }
        let symbol = trade.opportunity.symbol.clone();
        let retries = self.env.config.max_retries;
        let balance = with_retry("balance", retries, || self.env.upbit.balance(&symbol)).await?;
        let amount = self.env.coin_transfer_amount(balance.free);
        let baseline = with_retry("balance", retries, || self.env.binance.balance(&symbol))
            .await?
            .total();
        let (withdrawal_id, address) = self
            .env
            .withdraw_to_counterpart(Venue::Upbit, &symbol, amount)
            .await?;
        trade.record(
            TradeStep::new(TradeState::XferOut, &symbol)
                .on_venue(Venue::Upbit)
                .with_amount(amount)
                .with_order_id(&withdrawal_id)
                .with_baseline(baseline)
                .with_detail(format!("to {address}")),
        );
        Ok(TradeState::AwaitXferOut)
    }

    /// Poll Binance until the coin deposit lands.
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
            &self.env.binance,
            &symbol,
            step.amount,
            step.baseline.unwrap_or_default(),
            self.env.config.transfer_wait(),
            shutdown,
        )
        .await?;
        trade.record(
            TradeStep::new(TradeState::AwaitXferOut, &symbol)
                .on_venue(Venue::Binance)
                .with_amount(observed)
                .with_detail("deposit confirmed"),
        );
        Ok(TradeState::SellingUsdtSide)
    }

    /// Sell the full coin balance on Binance for USDT.
    async fn sell_coin(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::SellingUsdtSide) {
            return Ok(TradeState::XferHome);
        }
        let symbol = trade.opportunity.symbol.clone();
        let retries = self.env.config.max_retries;
        let qty = with_retry("balance", retries, || self.env.binance.balance(&symbol))
            .await?
            .free;
        let fill = self.env.checked_sell(Venue::Binance, &symbol, qty).await?;
        trade.record(
            TradeStep::new(TradeState::SellingUsdtSide, &symbol)
                .on_venue(Venue::Binance)
                .with_amount(fill.executed_qty)
                .with_order_id(&fill.order_id)
                .with_detail(format!("proceeds {} USDT", fill.executed_quote - fill.fee)),
        );
        Ok(TradeState::XferHome)
    }

    /// Withdraw the USDT proceeds back to Upbit.
    async fn transfer_home(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        if trade.has_step(TradeState::XferHome) {
            return Ok(TradeState::AwaitXferHome);
        }
        let retries = self.env.config.max_retries;
        let usdt = with_retry("balance", retries, || self.env.binance.balance("USDT"))
            .await?
            .free;
        let amount = self.env.usdt_transfer_amount(usdt);
        if amount <= Decimal::ZERO {
            return Err(StrategyError::Preflight(format!(
                "USDT balance {usdt} below transfer reserve"
            )));
        }
        let baseline = with_retry("balance", retries, || self.env.upbit.balance("USDT"))
            .await?
            .total();
        let (withdrawal_id, address) = self
            .env
            .withdraw_to_counterpart(Venue::Binance, "USDT", amount)
            .await?;
        trade.record(
            TradeStep::new(TradeState::XferHome, "USDT")
                .on_venue(Venue::Binance)
                .with_amount(amount)
                .with_order_id(&withdrawal_id)
                .with_baseline(baseline)
                .with_detail(format!("to {address}")),
        );
        Ok(TradeState::AwaitXferHome)
    }

    /// Poll Upbit until the USDT deposit lands.
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
            &self.env.upbit,
            "USDT",
            step.amount,
            step.baseline.unwrap_or_default(),
            self.env.config.transfer_wait(),
            shutdown,
        )
        .await?;
        trade.record(
            TradeStep::new(TradeState::AwaitXferHome, "USDT")
                .on_venue(Venue::Upbit)
                .with_amount(observed)
                .with_detail("deposit confirmed"),
        );
        Ok(TradeState::ConvertingHome)
    }

    /// Sell the USDT on Upbit for KRW and realize the cycle.
    async fn convert_home(&self, trade: &mut Trade) -> StrategyResult<TradeState> {
        let retries = self.env.config.max_retries;
        let usdt = with_retry("balance", retries, || self.env.upbit.balance("USDT"))
            .await?
            .free;
        let fill = self.env.checked_sell(Venue::Upbit, "USDT", usdt).await?;
        let final_krw = fill.executed_quote - fill.fee;
        let realized = final_krw - trade.opportunity.sized_amount_krw;
        trade.record(
            TradeStep::new(TradeState::ConvertingHome, "KRW")
                .on_venue(Venue::Upbit)
                .with_amount(final_krw)
                .with_order_id(&fill.order_id)
                .with_detail(format!("sold {} USDT", fill.executed_qty)),
        );
        trade.complete(realized);
        Ok(TradeState::Completed)
    }

}

/// Shared failure routing for both strategy drivers.
pub(crate) async fn route_failure(env: &StrategyEnv, trade: &mut Trade, err: StrategyError) {
    match err {
        StrategyError::Cancelled => {
            if trade.has_executed_order() {
                warn!(
                    "Trade {} cancelled mid-cycle, funds remain on venue",
                    trade.id
                );
                trade.mark_partial();
            } else {
                trade.abort("cancelled before execution".to_string());
            }
        }
        // A slippage violation means an order filled, even though no step
        // record exists for it yet: the funds moved, inspect them.
        err @ StrategyError::SlippageExceeded { .. } => enter_recovery(env, trade, err).await,
        err if !trade.has_executed_order() => {
            warn!("Trade {} aborted pre-execution: {}", trade.id, err);
            trade.abort(err.to_string());
        }
        err => enter_recovery(env, trade, err).await,
    }
}

/// Inspection-only recovery: snapshot balances on both venues, raise an
/// operator alert, and mark the trade failed. No automatic unwinding.
async fn enter_recovery(env: &StrategyEnv, trade: &mut Trade, err: StrategyError) {
    let symbol = trade.opportunity.symbol.clone();
    let mut snapshot = Vec::new();
    for (client, asset) in [
        (&env.upbit, "KRW"),
        (&env.upbit, symbol.as_str()),
        (&env.upbit, "USDT"),
        (&env.binance, symbol.as_str()),
        (&env.binance, "USDT"),
    ] {
        if let Ok(balance) = client.balance(asset).await {
            snapshot.push(format!("{}:{}={}", client.venue(), asset, balance.total()));
        }
    }
    error!(
        "Trade {} entering recovery after {}: balances [{}] require operator inspection",
        trade.id,
        err,
        snapshot.join(", ")
    );
    trade.record(
        TradeStep::new(TradeState::Recovery, &symbol)
            .with_detail(format!("{err}; balances: {}", snapshot.join(", "))),
    );
    trade.fail(err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StrategyConfig;
    use kimp_core::{BookLevel, Direction, OrderBook};
    use kimp_engine::{FiatRateProvider, RateError, RateSource};
    use kimp_risk::{RiskLimits, RiskManager};
    use kimp_venues::{PaperLedger, PaperVenue, StubVenue, VenueClient};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedRate(Decimal);

    #[async_trait::async_trait]
    impl RateSource for FixedRate {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn fetch(&self) -> Result<Decimal, RateError> {
            Ok(self.0)
        }
    }

    fn opportunity(sized_krw: Decimal) -> Opportunity {
        Opportunity {
            symbol: "BTC".into(),
            direction: Direction::Forward,
            premium_pct: dec!(-2.9),
            tether_premium_pct: dec!(0.0),
            est_fees_pct: dec!(0.5),
            safety_margin_pct: dec!(0.1),
            expected_profit_pct: dec!(2.9),
            sized_amount_krw: sized_krw,
            timestamp: chrono::Utc::now(),
        }
    }

    fn test_config() -> StrategyConfig {
        StrategyConfig {
            transfer_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
            ..Default::default()
        }
    }

    fn env_with(
        upbit: Arc<dyn VenueClient>,
        binance: Arc<dyn VenueClient>,
        config: StrategyConfig,
    ) -> StrategyEnv {
        StrategyEnv {
            upbit,
            binance,
            rates: Arc::new(FiatRateProvider::new(vec![Box::new(FixedRate(dec!(
                1300
            )))])),
            risk: RiskManager::spawn(RiskLimits {
                max_slippage_pct: dec!(5),
                ..Default::default()
            }),
            config,
        }
    }

    /// Full happy path over paper venues: real book-walking fills, simulated
    /// on-chain transfers, deposit confirmation via history entries.
    #[tokio::test(start_paused = true)]
    async fn test_forward_happy_path() {
        let ledger = PaperLedger::new(
            &[
                (Venue::Upbit, "KRW", dec!(10000000)),
                (Venue::Binance, "USDT", dec!(100)),
            ],
            None,
        );

        let upbit_md = StubVenue::new(Venue::Upbit);
        upbit_md.set_price("BTC", dec!(130000000));
        upbit_md.set_price("USDT", dec!(1300));
        upbit_md.set_book(
            "BTC",
            OrderBook::new(
                vec![BookLevel::new(dec!(129900000), dec!(10))],
                vec![BookLevel::new(dec!(130000000), dec!(10))],
            ),
        );
        upbit_md.set_book(
            "USDT",
            OrderBook::new(
                vec![BookLevel::new(dec!(1300), dec!(1000000))],
                vec![BookLevel::new(dec!(1301), dec!(1000000))],
            ),
        );

        let binance_md = StubVenue::new(Venue::Binance);
        // 3% above parity: the coin is cheap on the KRW side.
        binance_md.set_price("BTC", dec!(103000));
        binance_md.set_book(
            "BTC",
            OrderBook::new(
                vec![BookLevel::new(dec!(103000), dec!(100))],
                vec![BookLevel::new(dec!(103100), dec!(100))],
            ),
        );

        let upbit: Arc<dyn VenueClient> = Arc::new(
            PaperVenue::new(Arc::new(upbit_md), Arc::clone(&ledger))
                .with_transfer_delay(Duration::from_secs(60)),
        );
        let binance: Arc<dyn VenueClient> = Arc::new(
            PaperVenue::new(Arc::new(binance_md), Arc::clone(&ledger))
                .with_transfer_delay(Duration::from_secs(60)),
        );

        let strategy = ForwardStrategy::new(env_with(upbit, binance, test_config()));
        let (_tx, shutdown) = watch::channel(false);
        let trade = strategy.execute(opportunity(dec!(5000000)), shutdown).await;

        assert_eq!(trade.outcome, Some(crate::TradeOutcome::Completed));
        assert_eq!(trade.state, TradeState::Completed);
        // Every forward state left a step record.
        for state in [
            TradeState::Start,
            TradeState::BuyingKrw,
            TradeState::XferOut,
            TradeState::AwaitXferOut,
            TradeState::SellingUsdtSide,
            TradeState::XferHome,
            TradeState::AwaitXferHome,
            TradeState::ConvertingHome,
        ] {
            assert!(trade.has_step(state), "missing step {state}");
        }
        // 3% gross against ~1.6% of fees leaves a profit.
        assert!(
            trade.realized_profit_krw > Decimal::ZERO,
            "profit: {}",
            trade.realized_profit_krw
        );
    }

    /// Transfer timeout drives the trade into recovery.
    #[tokio::test(start_paused = true)]
    async fn test_forward_transfer_timeout_recovery() {
        let upbit = Arc::new(StubVenue::new(Venue::Upbit));
        upbit.set_price("BTC", dec!(130000000));
        upbit.set_balance("KRW", dec!(10000000));
        let binance = Arc::new(StubVenue::new(Venue::Binance));
        // No deposit ever scheduled on Binance: the wait must time out.

        let strategy = ForwardStrategy::new(env_with(
            Arc::clone(&upbit) as Arc<dyn VenueClient>,
            Arc::clone(&binance) as Arc<dyn VenueClient>,
            test_config(),
        ));
        let (_tx, shutdown) = watch::channel(false);
        let trade = strategy.execute(opportunity(dec!(1000000)), shutdown).await;

        assert_eq!(trade.outcome, Some(crate::TradeOutcome::Failed));
        assert_eq!(trade.state, TradeState::Recovery);
        assert!(trade.error.as_deref().unwrap().contains("Deposit timeout"));
        assert!(trade.has_step(TradeState::XferOut));
        assert!(!trade.has_step(TradeState::SellingUsdtSide));
        // The withdrawal itself went through before the wait began.
        assert_eq!(upbit.withdrawals().len(), 1);
    }

    /// Insufficient KRW fails pre-flight without touching the venues.
    #[tokio::test]
    async fn test_forward_preflight_abort() {
        let upbit = Arc::new(StubVenue::new(Venue::Upbit));
        upbit.set_balance("KRW", dec!(1000));
        let binance = Arc::new(StubVenue::new(Venue::Binance));

        let strategy = ForwardStrategy::new(env_with(
            Arc::clone(&upbit) as Arc<dyn VenueClient>,
            binance as Arc<dyn VenueClient>,
            test_config(),
        ));
        let (_tx, shutdown) = watch::channel(false);
        let trade = strategy.execute(opportunity(dec!(1000000)), shutdown).await;

        assert_eq!(trade.outcome, Some(crate::TradeOutcome::Failed));
        // Aborted, not recovered: nothing was acquired.
        assert_ne!(trade.state, TradeState::Recovery);
        assert!(trade.error.as_deref().unwrap().contains("Pre-flight"));
        assert!(!trade.has_step(TradeState::BuyingKrw));
    }

    /// Shutdown mid-transfer surfaces a partial outcome: an order executed
    /// but the cycle never closed.
    #[tokio::test(start_paused = true)]
    async fn test_forward_cancel_surfaces_partial() {
        let upbit = Arc::new(StubVenue::new(Venue::Upbit));
        upbit.set_price("BTC", dec!(130000000));
        upbit.set_balance("KRW", dec!(10000000));
        let binance = Arc::new(StubVenue::new(Venue::Binance));

        let strategy = ForwardStrategy::new(env_with(
            Arc::clone(&upbit) as Arc<dyn VenueClient>,
            binance as Arc<dyn VenueClient>,
            test_config(),
        ));
        let (tx, shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move {
            strategy.execute(opportunity(dec!(1000000)), shutdown).await
        });
        // Let the trade reach the deposit wait, then pull the plug.
        tokio::time::sleep(Duration::from_secs(45)).await;
        tx.send(true).unwrap();

        let trade = handle.await.unwrap();
        assert_eq!(trade.outcome, Some(crate::TradeOutcome::Partial));
        assert!(trade.has_step(TradeState::BuyingKrw));
    }

    /// Cancellation before anything executed is a plain failure.
    #[tokio::test]
    async fn test_forward_cancel_before_execution_fails() {
        let upbit = Arc::new(StubVenue::new(Venue::Upbit));
        upbit.set_balance("KRW", dec!(10000000));
        let binance = Arc::new(StubVenue::new(Venue::Binance));

        let strategy = ForwardStrategy::new(env_with(
            upbit as Arc<dyn VenueClient>,
            binance as Arc<dyn VenueClient>,
            test_config(),
        ));
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        let trade = strategy.execute(opportunity(dec!(1000000)), shutdown).await;
        assert_eq!(trade.outcome, Some(crate::TradeOutcome::Failed));
        assert!(!trade.has_executed_order());
    }
}
