//! Risk limit configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard risk ceilings. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_single_trade_krw: Decimal,
    pub max_daily_volume_krw: Decimal,
    pub max_concurrent_trades: usize,
    /// Maximum tolerated execution slippage, percent.
    pub max_slippage_pct: Decimal,
    /// Daily loss as percent of daily volume that trips the emergency stop.
    pub emergency_loss_pct: Decimal,
    pub min_venue_balance_krw: Decimal,
    /// Maximum open exposure as percent of the daily volume limit.
    pub max_exposure_pct: Decimal,
}

impl RiskLimits {
    /// Open-exposure ceiling in KRW.
    pub fn max_exposure_krw(&self) -> Decimal {
        self.max_daily_volume_krw * self.max_exposure_pct / Decimal::ONE_HUNDRED
    }

    /// Reject contradictory or non-positive limits.
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_single_trade_krw <= Decimal::ZERO
            || self.max_daily_volume_krw <= Decimal::ZERO
            || self.max_slippage_pct <= Decimal::ZERO
            || self.emergency_loss_pct <= Decimal::ZERO
            || self.max_exposure_pct <= Decimal::ZERO
        {
            return Err(LimitsError::NonPositive);
        }
        if self.max_concurrent_trades == 0 {
            return Err(LimitsError::NonPositive);
        }
        if self.max_single_trade_krw > self.max_daily_volume_krw {
            return Err(LimitsError::SingleExceedsDaily);
        }
        Ok(())
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_single_trade_krw: Decimal::from(5_000_000u64),
            max_daily_volume_krw: Decimal::from(50_000_000u64),
            max_concurrent_trades: 3,
            max_slippage_pct: Decimal::from_parts(5, 0, 0, false, 1),
            emergency_loss_pct: Decimal::from(3u64),
            min_venue_balance_krw: Decimal::from(1_000_000u64),
            max_exposure_pct: Decimal::from(30u64),
        }
    }
}

/// Validation failures for [`RiskLimits`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitsError {
    #[error("risk limits must be positive")]
    NonPositive,

    #[error("max_single_trade_krw exceeds max_daily_volume_krw")]
    SingleExceedsDaily,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_limits_valid() {
        assert_eq!(RiskLimits::default().validate(), Ok(()));
    }

    #[test]
    fn test_exposure_ceiling() {
        let limits = RiskLimits::default();
        // 30% of 50M.
        assert_eq!(limits.max_exposure_krw(), dec!(15000000));
    }

    #[test]
    fn test_contradictory_limits_rejected() {
        let limits = RiskLimits {
            max_single_trade_krw: dec!(100000000),
            ..Default::default()
        };
        assert_eq!(limits.validate(), Err(LimitsError::SingleExceedsDaily));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let limits = RiskLimits {
            max_slippage_pct: Decimal::ZERO,
            ..Default::default()
        };
        assert_eq!(limits.validate(), Err(LimitsError::NonPositive));
    }
}
