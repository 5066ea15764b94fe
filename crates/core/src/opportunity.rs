//! Typed arbitrage opportunities.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an arbitrage cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Coin cheaper on the KRW venue: buy KRW side, sell USDT side.
    Forward,
    /// Coin more expensive on the KRW venue: buy USDT side, sell KRW side.
    Reverse,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A profitable, sized, one-shot trade candidate.
///
/// Value object: created by the premium calculator, consumed once by a
/// strategy, never mutated. `net_profit_pct()` is positive at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: CompactString,
    pub direction: Direction,
    /// Signed coin premium at detection time, percent.
    pub premium_pct: Decimal,
    /// Tether premium at detection time, percent.
    pub tether_premium_pct: Decimal,
    /// Estimated total fees, percent of trade size.
    pub est_fees_pct: Decimal,
    /// Configured safety margin, percent.
    pub safety_margin_pct: Decimal,
    /// Expected gross profit before fees and margin, percent.
    pub expected_profit_pct: Decimal,
    /// Trade size in KRW, bounded by book depth and configured clamps.
    pub sized_amount_krw: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    /// Expected profit net of fees and safety margin, percent.
    pub fn net_profit_pct(&self) -> Decimal {
        self.expected_profit_pct - self.est_fees_pct - self.safety_margin_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn sample() -> Opportunity {
        Opportunity {
            symbol: CompactString::new("BTC"),
            direction: Direction::Forward,
            premium_pct: dec!(-0.99),
            tether_premium_pct: dec!(0.3),
            est_fees_pct: dec!(0.4),
            safety_margin_pct: dec!(0.1),
            expected_profit_pct: dec!(0.69),
            sized_amount_krw: dec!(1000000),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_net_profit() {
        let opp = sample();
        assert_eq!(opp.net_profit_pct(), dec!(0.19));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Forward.to_string(), "forward");
        assert_eq!(Direction::Reverse.to_string(), "reverse");
    }
}
