//! Premium snapshots: the KRW-normalized price gap between venues.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-symbol signed premium at one instant.
///
/// `premium_pct` is the percentage by which the Upbit KRW price exceeds the
/// KRW-converted Binance price. Positive means the KRW venue is expensive
/// (kimchi premium), negative means it is cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumSnapshot {
    pub symbol: CompactString,
    /// Upbit price, KRW.
    pub price_krw: Decimal,
    /// Binance price, USDT.
    pub price_usdt: Decimal,
    /// Binance price converted to KRW via the fiat rate.
    pub price_usdt_krw: Decimal,
    /// Signed premium in percent.
    pub premium_pct: Decimal,
    /// USD/KRW rate used for the conversion.
    pub fiat_rate: Decimal,
    /// True when the fiat rate came from an over-age cache entry.
    pub stale: bool,
    pub timestamp: DateTime<Utc>,
}

impl PremiumSnapshot {
    /// Compute a snapshot from raw venue prices and the fiat rate.
    ///
    /// Returns `None` when the converted price is not positive, which would
    /// make the premium undefined.
    pub fn compute(
        symbol: &str,
        price_krw: Decimal,
        price_usdt: Decimal,
        fiat_rate: Decimal,
        stale: bool,
    ) -> Option<Self> {
        let price_usdt_krw = price_usdt * fiat_rate;
        if price_usdt_krw <= Decimal::ZERO {
            return None;
        }
        let premium_pct = (price_krw - price_usdt_krw) / price_usdt_krw * Decimal::ONE_HUNDRED;
        Some(Self {
            symbol: CompactString::new(symbol),
            price_krw,
            price_usdt,
            price_usdt_krw,
            premium_pct,
            fiat_rate,
            stale,
            timestamp: Utc::now(),
        })
    }

    /// KRW venue more expensive than the converted USDT price.
    #[inline]
    pub fn is_kimchi_premium(&self) -> bool {
        self.premium_pct > Decimal::ZERO
    }

    /// KRW venue cheaper than the converted USDT price.
    #[inline]
    pub fn is_discount(&self) -> bool {
        self.premium_pct < Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_premium_at_parity() {
        let snap =
            PremiumSnapshot::compute("BTC", dec!(130000000), dec!(100000), dec!(1300), false)
                .unwrap();
        assert_eq!(snap.premium_pct, Decimal::ZERO);
        assert_eq!(snap.price_usdt_krw, dec!(130000000));
    }

    #[test]
    fn test_discount_premium_sign() {
        // Binance at 101,000 USDT -> 131,300,000 KRW vs Upbit 130,000,000.
        let snap =
            PremiumSnapshot::compute("BTC", dec!(130000000), dec!(101000), dec!(1300), false)
                .unwrap();
        assert!(snap.is_discount());
        assert!(snap.premium_pct < dec!(-0.98) && snap.premium_pct > dec!(-1.0));
    }

    #[test]
    fn test_premium_symmetry_identity() {
        // price_krw - price_usdt_krw == premium * price_usdt_krw / 100
        let snap =
            PremiumSnapshot::compute("ETH", dec!(5100000), dec!(3900), dec!(1300), false).unwrap();
        let lhs = snap.price_krw - snap.price_usdt_krw;
        let rhs = snap.premium_pct * snap.price_usdt_krw / Decimal::ONE_HUNDRED;
        assert_eq!(lhs.round_dp(10), rhs.round_dp(10));
    }

    #[test]
    fn test_nonpositive_converted_price_rejected() {
        assert!(PremiumSnapshot::compute("BTC", dec!(1), Decimal::ZERO, dec!(1300), false).is_none());
    }
}
