//! Shared strategy scaffolding.
//!
//! Both strategy variants drive the same venue pair, rate provider and risk
//! handle; the helpers here cover the legs they have in common: slippage-
//! checked market orders and network-validated withdrawals.

use crate::{StrategyError, StrategyResult, TransferWait};
use compact_str::CompactString;
use kimp_core::{Coin, TradeSide, Venue};
use kimp_engine::FiatRateProvider;
use kimp_risk::RiskHandle;
use kimp_venues::{with_retry, BuyFunds, TradeFill, VenueClient};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tunables shared by both strategy variants.
#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    pub transfer_timeout: Duration,
    pub poll_interval: Duration,
    /// Fraction of a coin balance held back on withdrawal to dodge
    /// under-minimum errors.
    pub dust_frac: Decimal,
    /// USDT held back on stablecoin withdrawals.
    pub usdt_reserve: Decimal,
    /// Retry budget for transient venue failures per call.
    pub max_retries: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(30),
            dust_frac: Decimal::from_parts(1, 0, 0, false, 3),
            usdt_reserve: Decimal::ONE,
            max_retries: 3,
        }
    }
}

impl StrategyConfig {
    pub fn transfer_wait(&self) -> TransferWait {
        TransferWait {
            poll_interval: self.poll_interval,
            timeout: self.transfer_timeout,
        }
    }
}

/// Execution environment shared by the forward and reverse strategies.
pub struct StrategyEnv {
    pub upbit: Arc<dyn VenueClient>,
    pub binance: Arc<dyn VenueClient>,
    pub rates: Arc<FiatRateProvider>,
    pub risk: RiskHandle,
    pub config: StrategyConfig,
}

impl StrategyEnv {
    pub fn venue(&self, venue: Venue) -> &Arc<dyn VenueClient> {
        match venue {
            Venue::Upbit => &self.upbit,
            Venue::Binance => &self.binance,
        }
    }

    /// Market buy with a slippage check against the pre-trade ticker.
    pub async fn checked_buy(
        &self,
        venue: Venue,
        symbol: &str,
        funds: BuyFunds,
    ) -> StrategyResult<TradeFill> {
        let client = self.venue(venue);
        let expected = with_retry("ticker", self.config.max_retries, || client.ticker(symbol))
            .await?;
        let fill = with_retry("market_buy", self.config.max_retries, || {
            client.market_buy(symbol, funds)
        })
        .await?;
        self.enforce_slippage(expected, fill.avg_price(), TradeSide::Buy)
            .await?;
        info!(
            "Bought {} {} on {} @ {} (order {})",
            fill.executed_qty,
            symbol,
            venue,
            fill.avg_price(),
            fill.order_id
        );
        Ok(fill)
    }

    /// Market sell with a slippage check against the pre-trade ticker.
    pub async fn checked_sell(
        &self,
        venue: Venue,
        symbol: &str,
        base_qty: Decimal,
    ) -> StrategyResult<TradeFill> {
        let client = self.venue(venue);
        let expected = with_retry("ticker", self.config.max_retries, || client.ticker(symbol))
            .await?;
        let fill = with_retry("market_sell", self.config.max_retries, || {
            client.market_sell(symbol, base_qty)
        })
        .await?;
        self.enforce_slippage(expected, fill.avg_price(), TradeSide::Sell)
            .await?;
        info!(
            "Sold {} {} on {} @ {} (order {})",
            fill.executed_qty,
            symbol,
            venue,
            fill.avg_price(),
            fill.order_id
        );
        Ok(fill)
    }

    async fn enforce_slippage(
        &self,
        expected: Decimal,
        actual: Decimal,
        side: TradeSide,
    ) -> StrategyResult<()> {
        if expected.is_zero() || actual.is_zero() {
            return Ok(());
        }
        let (ok, slippage_pct) = self.risk.check_slippage(expected, actual, side).await;
        if !ok {
            return Err(StrategyError::SlippageExceeded {
                side: side.to_string(),
                slippage_pct,
            });
        }
        Ok(())
    }

    /// Withdraw `amount` of `asset` from `from` to its counterpart venue
    /// over the asset's preferred network. The destination's offered network
    /// must match, or the transfer is refused before any funds move.
    ///
    /// Returns the withdrawal id and the destination address.
    pub async fn withdraw_to_counterpart(
        &self,
        from: Venue,
        asset: &str,
        amount: Decimal,
    ) -> StrategyResult<(CompactString, String)> {
        let to = from.counterpart();
        let coin = Coin::from_symbol(asset);
        let wanted = coin.preferred_network.clone();

        let to_client = self.venue(to);
        let address = with_retry("deposit_address", self.config.max_retries, || {
            to_client.deposit_address(asset, Some(wanted.as_str()))
        })
        .await?;
        if address.network != wanted {
            return Err(StrategyError::NetworkMismatch {
                wanted: wanted.to_string(),
                offered: address.network.to_string(),
            });
        }

        let from_client = self.venue(from);
        let withdrawal_id = with_retry("withdraw", self.config.max_retries, || {
            from_client.withdraw(
                asset,
                &address.address,
                amount,
                Some(wanted.as_str()),
                address.tag.as_deref(),
            )
        })
        .await?;
        info!(
            "Withdrew {} {} from {} to {} via {} (id {})",
            amount, asset, from, to, wanted, withdrawal_id
        );
        Ok((withdrawal_id, address.address))
    }

    /// Transferable coin amount: the full balance less the dust hold-back.
    pub fn coin_transfer_amount(&self, balance_free: Decimal) -> Decimal {
        balance_free * (Decimal::ONE - self.config.dust_frac)
    }

    /// Transferable stablecoin amount: the balance less the fixed reserve.
    pub fn usdt_transfer_amount(&self, balance_free: Decimal) -> Decimal {
        (balance_free - self.config.usdt_reserve).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kimp_risk::{RiskLimits, RiskManager};
    use kimp_venues::StubVenue;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn env() -> (Arc<StubVenue>, Arc<StubVenue>, StrategyEnv) {
        let upbit = Arc::new(StubVenue::new(Venue::Upbit));
        let binance = Arc::new(StubVenue::new(Venue::Binance));
        let env = StrategyEnv {
            upbit: Arc::clone(&upbit) as Arc<dyn VenueClient>,
            binance: Arc::clone(&binance) as Arc<dyn VenueClient>,
            rates: Arc::new(FiatRateProvider::new(Vec::new())),
            risk: RiskManager::spawn(RiskLimits::default()),
            config: StrategyConfig::default(),
        };
        (upbit, binance, env)
    }

    #[tokio::test]
    async fn test_withdraw_refused_on_network_mismatch() {
        let (_, binance, env) = env();
        binance.set_deposit_network("USDT", "ERC20");

        let result = env
            .withdraw_to_counterpart(Venue::Upbit, "USDT", dec!(100))
            .await;
        assert!(matches!(
            result,
            Err(StrategyError::NetworkMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_withdraw_uses_preferred_network() {
        let (upbit, _, env) = env();
        upbit.set_balance("USDT", dec!(500));

        let (id, address) = env
            .withdraw_to_counterpart(Venue::Upbit, "USDT", dec!(400))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "wd-1");
        assert!(address.contains("binance"));
        let withdrawal = &upbit.withdrawals()[0];
        assert_eq!(withdrawal.network.as_deref(), Some("TRC20"));
    }

    #[tokio::test]
    async fn test_checked_buy_fills_and_logs() {
        let (upbit, _, env) = env();
        upbit.set_price("BTC", dec!(130000000));
        upbit.set_balance("KRW", dec!(2000000));

        let fill = env
            .checked_buy(Venue::Upbit, "BTC", BuyFunds::Quote(dec!(1000000)))
            .await
            .unwrap();
        assert!(fill.executed_qty > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transfer_amounts() {
        let (_, _, env) = env();
        assert_eq!(env.coin_transfer_amount(dec!(1)), dec!(0.999));
        assert_eq!(env.usdt_transfer_amount(dec!(500)), dec!(499));
        assert_eq!(env.usdt_transfer_amount(dec!(0.5)), Decimal::ZERO);
    }
}
