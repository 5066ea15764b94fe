//! Premium calculation and opportunity detection.

use crate::{size_trade_krw, EngineError, EngineResult, FeeModel, FiatRateProvider, DEPTH_LEVELS};
use chrono::Utc;
use compact_str::CompactString;
use kimp_core::{Coin, Direction, Opportunity, PremiumSnapshot};
use kimp_venues::VenueClient;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Computes signed premiums and typed opportunities for one symbol at a
/// time. Pure reader: it fetches from both venues and the rate provider and
/// never mutates shared state.
pub struct PremiumCalculator {
    upbit: Arc<dyn VenueClient>,
    binance: Arc<dyn VenueClient>,
    rates: Arc<FiatRateProvider>,
    fees: FeeModel,
}

impl PremiumCalculator {
    pub fn new(
        upbit: Arc<dyn VenueClient>,
        binance: Arc<dyn VenueClient>,
        rates: Arc<FiatRateProvider>,
    ) -> Self {
        Self {
            upbit,
            binance,
            rates,
            fees: FeeModel::default(),
        }
    }

    pub fn with_fees(mut self, fees: FeeModel) -> Self {
        self.fees = fees;
        self
    }

    /// Signed premium for `symbol`. Both venue prices and the fiat rate are
    /// fetched concurrently; no snapshot is produced unless all three
    /// succeed.
    pub async fn premium(&self, symbol: &str) -> EngineResult<PremiumSnapshot> {
        let (price_krw, price_usdt, rate) = tokio::join!(
            self.upbit.ticker(symbol),
            self.binance.ticker(symbol),
            self.rates.current(),
        );
        let price_krw = price_krw?;
        let price_usdt = price_usdt?;
        let rate = rate?;

        PremiumSnapshot::compute(symbol, price_krw, price_usdt, rate.rate, rate.stale)
            .ok_or(EngineError::FiatUnavailable)
    }

    /// Premium of the stablecoin itself: the Upbit USDT/KRW price against
    /// the theoretical KRW-per-USDT equal to the fiat rate.
    pub async fn tether_premium(&self) -> EngineResult<PremiumSnapshot> {
        let (usdt_krw, rate) = tokio::join!(self.upbit.ticker("USDT"), self.rates.current());
        let usdt_krw = usdt_krw?;
        let rate = rate?;

        PremiumSnapshot::compute("USDT", usdt_krw, Decimal::ONE, rate.rate, rate.stale)
            .ok_or(EngineError::FiatUnavailable)
    }

    /// Check `symbol` for a profitable cycle in either direction.
    ///
    /// A forward opportunity requires the coin to trade at a discount on the
    /// KRW venue, a reverse one at a kimchi premium; either way the expected
    /// profit net of the tether premium must clear fees plus the safety
    /// margin. The emitted opportunity is sized against book depth and
    /// clamped to `[min_krw, max_krw]`.
    pub async fn check_opportunity(
        &self,
        symbol: &str,
        safety_margin_pct: Decimal,
        min_krw: Decimal,
        max_krw: Decimal,
    ) -> EngineResult<Option<Opportunity>> {
        let coin_premium = self.premium(symbol).await?;
        let tether = self.tether_premium().await?;

        let direction = if coin_premium.is_discount() {
            Direction::Forward
        } else if coin_premium.is_kimchi_premium() {
            Direction::Reverse
        } else {
            return Ok(None);
        };

        // Closing any cycle crosses the USDT/KRW market, so the tether
        // premium nets against the coin premium in both directions.
        let expected_profit_pct = match direction {
            Direction::Forward => coin_premium.premium_pct.abs() - tether.premium_pct,
            Direction::Reverse => coin_premium.premium_pct - tether.premium_pct,
        };

        let Some(sized_amount_krw) = self.size(symbol, coin_premium.fiat_rate, min_krw, max_krw).await?
        else {
            return Ok(None);
        };

        let coin = Coin::from_symbol(symbol);
        let est_fees_pct =
            self.fees
                .total_fees_pct(&coin, coin_premium.price_krw, sized_amount_krw);

        if expected_profit_pct <= est_fees_pct + safety_margin_pct {
            debug!(
                "{} {}: expected {:.4}% under fees {:.4}% + margin {:.4}%",
                symbol, direction, expected_profit_pct, est_fees_pct, safety_margin_pct
            );
            return Ok(None);
        }

        Ok(Some(Opportunity {
            symbol: CompactString::new(symbol),
            direction,
            premium_pct: coin_premium.premium_pct,
            tether_premium_pct: tether.premium_pct,
            est_fees_pct,
            safety_margin_pct,
            expected_profit_pct,
            sized_amount_krw,
            timestamp: Utc::now(),
        }))
    }

    async fn size(
        &self,
        symbol: &str,
        fiat_rate: Decimal,
        min_krw: Decimal,
        max_krw: Decimal,
    ) -> EngineResult<Option<Decimal>> {
        let (upbit_book, binance_book) = tokio::join!(
            self.upbit.order_book(symbol, DEPTH_LEVELS),
            self.binance.order_book(symbol, DEPTH_LEVELS),
        );
        let upbit_book = upbit_book?;
        let binance_book = binance_book?;
        Ok(size_trade_krw(
            &upbit_book,
            &binance_book,
            fiat_rate,
            min_krw,
            max_krw,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RateError, RateSource};
    use async_trait::async_trait;
    use kimp_core::{BookLevel, OrderBook, Venue};
    use kimp_venues::StubVenue;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FixedRate {
        rate: Decimal,
        failing: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RateSource for FixedRate {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self) -> Result<Decimal, RateError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(RateError::Source("fixed".into(), "down".into()))
            } else {
                Ok(self.rate)
            }
        }
    }

    struct Fixture {
        upbit: Arc<StubVenue>,
        binance: Arc<StubVenue>,
        calc: PremiumCalculator,
        rate_failing: Arc<AtomicBool>,
    }

    fn fixture(rate: Decimal) -> Fixture {
        let upbit = Arc::new(StubVenue::new(Venue::Upbit));
        let binance = Arc::new(StubVenue::new(Venue::Binance));
        let failing = Arc::new(AtomicBool::new(false));
        let rates = Arc::new(FiatRateProvider::new(vec![Box::new(FixedRate {
            rate,
            failing: Arc::clone(&failing),
        })]));
        let calc = PremiumCalculator::new(
            Arc::clone(&upbit) as Arc<dyn VenueClient>,
            Arc::clone(&binance) as Arc<dyn VenueClient>,
            rates,
        );
        Fixture {
            upbit,
            binance,
            calc,
            rate_failing: failing,
        }
    }

    fn deep_book(price: Decimal) -> OrderBook {
        let levels: Vec<BookLevel> = (0..DEPTH_LEVELS)
            .map(|_| BookLevel::new(price, dec!(100000000) / price))
            .collect();
        OrderBook::new(levels.clone(), levels)
    }

    #[tokio::test]
    async fn test_premium_at_parity_is_zero() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(100000));

        let snap = fx.calc.premium("BTC").await.unwrap();
        assert_eq!(snap.premium_pct, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_premium_unavailable_without_rate() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(100000));
        fx.rate_failing.store(true, Ordering::SeqCst);

        assert!(matches!(
            fx.calc.premium("BTC").await,
            Err(EngineError::FiatUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_tether_premium() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("USDT", dec!(1303.9));

        let snap = fx.calc.tether_premium().await.unwrap();
        assert_eq!(snap.premium_pct, dec!(0.3));
    }

    /// Forward arbitrage happy path with the canonical numbers: Binance at
    /// 101,000 USDT makes Upbit ~0.99% cheap; tether premium 0.3%; the gap
    /// clears fees + 0.1% margin at a depth-sized trade.
    #[tokio::test]
    async fn test_forward_opportunity_emitted() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(101000));
        fx.upbit.set_price("USDT", dec!(1303.9));
        fx.upbit.set_book("BTC", deep_book(dec!(130000000)));
        fx.binance.set_book("BTC", deep_book(dec!(101000)));

        let opp = fx
            .calc
            .check_opportunity("BTC", dec!(0.1), dec!(100000), dec!(500000000))
            .await
            .unwrap()
            .expect("forward opportunity");

        assert_eq!(opp.direction, Direction::Forward);
        assert!(opp.premium_pct < dec!(-0.98));
        assert_eq!(opp.tether_premium_pct, dec!(0.3));
        assert!(opp.net_profit_pct() > Decimal::ZERO);
        // 30% of the thinnest side (Upbit, 5 x 100M KRW).
        assert_eq!(opp.sized_amount_krw, dec!(150000000));
    }

    #[tokio::test]
    async fn test_reverse_opportunity_emitted() {
        let fx = fixture(dec!(1300));
        // Upbit 1.01% above the converted Binance price.
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(99000));
        fx.upbit.set_price("USDT", dec!(1303.9));
        fx.upbit.set_book("BTC", deep_book(dec!(130000000)));
        fx.binance.set_book("BTC", deep_book(dec!(99000)));

        let opp = fx
            .calc
            .check_opportunity("BTC", dec!(0.1), dec!(100000), dec!(500000000))
            .await
            .unwrap()
            .expect("reverse opportunity");
        assert_eq!(opp.direction, Direction::Reverse);
        assert!(opp.premium_pct > dec!(1.0));
    }

    #[tokio::test]
    async fn test_no_opportunity_when_margin_eats_profit() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(101000));
        fx.upbit.set_price("USDT", dec!(1303.9));
        fx.upbit.set_book("BTC", deep_book(dec!(130000000)));
        fx.binance.set_book("BTC", deep_book(dec!(101000)));

        // A fat safety margin swallows the 0.69% gross edge.
        let opp = fx
            .calc
            .check_opportunity("BTC", dec!(5.0), dec!(100000), dec!(5000000))
            .await
            .unwrap();
        assert_eq!(opp, None);
    }

    #[tokio::test]
    async fn test_no_opportunity_without_rate() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(101000));
        fx.rate_failing.store(true, Ordering::SeqCst);

        assert!(fx
            .calc
            .check_opportunity("BTC", dec!(0.1), dec!(100000), dec!(5000000))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_opportunity_sizing_respects_bounds() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(101000));
        fx.upbit.set_price("USDT", dec!(1303.9));
        // Thin books: a single dust-sized level each.
        fx.upbit.set_book(
            "BTC",
            OrderBook::new(
                vec![BookLevel::new(dec!(130000000), dec!(0.001))],
                vec![BookLevel::new(dec!(130000000), dec!(0.001))],
            ),
        );
        fx.binance.set_book(
            "BTC",
            OrderBook::new(
                vec![BookLevel::new(dec!(101000), dec!(0.001))],
                vec![BookLevel::new(dec!(101000), dec!(0.001))],
            ),
        );

        // Depth clamps the size to the 100,000 KRW floor, where the fixed
        // withdraw fee dwarfs the premium: no opportunity.
        let opp = fx
            .calc
            .check_opportunity("BTC", dec!(0.01), dec!(100000), dec!(5000000))
            .await
            .unwrap();
        assert_eq!(opp, None);
    }

    /// Fiat staleness lifecycle as seen through `premium()`.
    #[tokio::test(start_paused = true)]
    async fn test_premium_stale_rate_lifecycle() {
        let fx = fixture(dec!(1300));
        fx.upbit.set_price("BTC", dec!(130000000));
        fx.binance.set_price("BTC", dec!(100000));

        assert!(!fx.calc.premium("BTC").await.unwrap().stale);
        fx.rate_failing.store(true, Ordering::SeqCst);

        // Half an hour in: cached value still under the ceiling, stale flag
        // set once past the freshness window.
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let snap = fx.calc.premium("BTC").await.unwrap();
        assert!(snap.stale);

        // Past the ceiling: no snapshot at all.
        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert!(matches!(
            fx.calc.premium("BTC").await,
            Err(EngineError::FiatUnavailable)
        ));
    }
}
