//! Synchronous risk state.
//!
//! Pure bookkeeping over the daily counters, the active-trade map and the
//! emergency latch. The actor in [`crate::manager`] owns one instance; the
//! date is always passed in so the daily roll is directly testable.

use crate::RiskLimits;
use chrono::NaiveDate;
use compact_str::CompactString;
use kimp_core::{Opportunity, TradeSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Counters reset at the local-day boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub volume_krw: Decimal,
    pub profit_krw: Decimal,
    pub loss_krw: Decimal,
    pub trade_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
}

/// Point-in-time metrics snapshot for the metrics loop and sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub daily_volume_krw: Decimal,
    pub daily_profit_krw: Decimal,
    pub daily_loss_krw: Decimal,
    pub net_profit_krw: Decimal,
    pub trade_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub success_rate_pct: Decimal,
    pub exposure_krw: Decimal,
    pub active_trades: usize,
    pub emergency_stopped: bool,
}

/// The state owned by the risk actor.
#[derive(Debug)]
pub struct RiskLedger {
    limits: RiskLimits,
    counters: DailyCounters,
    day_key: NaiveDate,
    /// Active trade id -> sized amount KRW. Exposure is the sum of values,
    /// so ledger conservation holds by construction.
    active: HashMap<CompactString, Decimal>,
    emergency_reason: Option<String>,
}

impl RiskLedger {
    pub fn new(limits: RiskLimits, today: NaiveDate) -> Self {
        Self {
            limits,
            counters: DailyCounters::default(),
            day_key: today,
            active: HashMap::new(),
            emergency_reason: None,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Current open exposure in KRW.
    pub fn exposure_krw(&self) -> Decimal {
        self.active.values().copied().sum()
    }

    /// Admission check. Returns the first failing reason verbatim.
    pub fn can_execute(&mut self, opportunity: &Opportunity, today: NaiveDate) -> (bool, String) {
        self.roll_if_new_day(today);

        if let Some(reason) = &self.emergency_reason {
            return (false, format!("Emergency stop active: {reason}"));
        }
        if self.active.len() >= self.limits.max_concurrent_trades {
            return (false, "Maximum concurrent trades reached".to_string());
        }
        if opportunity.sized_amount_krw > self.limits.max_single_trade_krw {
            return (false, "Trade amount exceeds single trade limit".to_string());
        }
        if self.counters.volume_krw + opportunity.sized_amount_krw > self.limits.max_daily_volume_krw
        {
            return (false, "Trade would exceed daily volume limit".to_string());
        }
        if self.exposure_krw() + opportunity.sized_amount_krw > self.limits.max_exposure_krw() {
            return (
                false,
                "Trade would exceed maximum exposure limit".to_string(),
            );
        }
        if opportunity.net_profit_pct() <= Decimal::ZERO {
            return (false, "Trade opportunity no longer profitable".to_string());
        }
        (true, "Trade approved".to_string())
    }

    /// Record a trade entering execution.
    pub fn register_start(&mut self, trade_id: &str, opportunity: &Opportunity) {
        self.active
            .insert(CompactString::new(trade_id), opportunity.sized_amount_krw);
        self.counters.trade_count += 1;
    }

    /// Record a terminal trade. Releases exposure and folds the realized
    /// amount into the daily counters.
    pub fn register_end(&mut self, trade_id: &str, realized_profit_krw: Decimal, success: bool) {
        let Some(amount) = self.active.remove(trade_id) else {
            warn!("Trade {} not found in active ledger", trade_id);
            return;
        };
        self.counters.volume_krw += amount;
        if success {
            self.counters.success_count += 1;
            if realized_profit_krw > Decimal::ZERO {
                self.counters.profit_krw += realized_profit_krw;
            } else {
                self.counters.loss_krw += realized_profit_krw.abs();
            }
        } else {
            self.counters.fail_count += 1;
            self.counters.loss_krw += realized_profit_krw.abs();
        }
    }

    /// Evaluate the emergency conditions, latching on the first trip.
    pub fn check_emergency_stop(&mut self) -> (bool, String) {
        if let Some(reason) = &self.emergency_reason {
            return (true, reason.clone());
        }

        if self.counters.volume_krw > Decimal::ZERO {
            let loss_rate =
                self.counters.loss_krw / self.counters.volume_krw * Decimal::ONE_HUNDRED;
            if loss_rate > self.limits.emergency_loss_pct {
                let reason = format!(
                    "Emergency stop triggered: Daily loss {:.2}% exceeds limit",
                    loss_rate
                );
                self.emergency_reason = Some(reason.clone());
                return (true, reason);
            }
        }

        if self.counters.trade_count > 10 {
            let failure_rate = Decimal::from(self.counters.fail_count)
                / Decimal::from(self.counters.trade_count)
                * Decimal::ONE_HUNDRED;
            if failure_rate > Decimal::from(50u64) {
                let reason = format!(
                    "Emergency stop triggered: High failure rate {:.1}%",
                    failure_rate
                );
                self.emergency_reason = Some(reason.clone());
                return (true, reason);
            }
        }

        (false, "System operating normally".to_string())
    }

    /// Clear the emergency latch. Operator action only.
    pub fn reset_emergency_stop(&mut self) {
        if self.emergency_reason.take().is_some() {
            info!("Emergency stop reset by operator");
        }
    }

    /// Execution slippage check. Buys fail when the actual price exceeds
    /// the tolerated markup, sells symmetrically on the downside.
    pub fn check_slippage(
        &self,
        expected: Decimal,
        actual: Decimal,
        side: TradeSide,
    ) -> (bool, Decimal) {
        let slippage_pct = match side {
            TradeSide::Buy => (actual - expected) / expected * Decimal::ONE_HUNDRED,
            TradeSide::Sell => (expected - actual) / expected * Decimal::ONE_HUNDRED,
        };
        (slippage_pct <= self.limits.max_slippage_pct, slippage_pct)
    }

    /// Clamp a candidate size to every remaining headroom: single-trade cap,
    /// 90% of funds on each side, daily volume and exposure remainders.
    /// Rounded down to the nearest 10,000 KRW.
    pub fn safe_trade_amount(
        &self,
        opportunity: &Opportunity,
        available_krw: Decimal,
        available_usdt: Decimal,
        fiat_rate: Option<Decimal>,
    ) -> Decimal {
        let Some(rate) = fiat_rate else {
            return Decimal::ZERO;
        };
        let ninety_pct = Decimal::from_parts(9, 0, 0, false, 1);
        let mut safe = opportunity.sized_amount_krw;
        safe = safe.min(self.limits.max_single_trade_krw);
        safe = safe.min(available_krw * ninety_pct);
        safe = safe.min(available_usdt * rate * ninety_pct);
        safe = safe.min(self.limits.max_daily_volume_krw - self.counters.volume_krw);
        safe = safe.min(self.limits.max_exposure_krw() - self.exposure_krw());
        if safe <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let step = Decimal::from(10_000u64);
        (safe / step).floor() * step
    }

    /// Minimum-balance check for the health loop. Fails when the fiat rate
    /// is unavailable since the USDT side cannot be valued.
    pub fn validate_balances(
        &self,
        upbit_krw: Decimal,
        binance_usdt: Decimal,
        fiat_rate: Option<Decimal>,
    ) -> (bool, String) {
        let Some(rate) = fiat_rate else {
            return (
                false,
                "Cannot validate balances: Exchange rate unavailable".to_string(),
            );
        };
        if upbit_krw < self.limits.min_venue_balance_krw {
            return (
                false,
                format!(
                    "Insufficient Upbit KRW balance: {} < {}",
                    upbit_krw, self.limits.min_venue_balance_krw
                ),
            );
        }
        let binance_krw = binance_usdt * rate;
        if binance_krw < self.limits.min_venue_balance_krw {
            return (
                false,
                format!("Insufficient Binance balance: {} KRW equivalent", binance_krw),
            );
        }
        (true, "Balances sufficient".to_string())
    }

    /// Metrics snapshot, rolling the counters first if the day changed.
    pub fn metrics(&mut self, today: NaiveDate) -> RiskMetrics {
        self.roll_if_new_day(today);
        let success_rate_pct = if self.counters.trade_count > 0 {
            Decimal::from(self.counters.success_count) / Decimal::from(self.counters.trade_count)
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        RiskMetrics {
            daily_volume_krw: self.counters.volume_krw,
            daily_profit_krw: self.counters.profit_krw,
            daily_loss_krw: self.counters.loss_krw,
            net_profit_krw: self.counters.profit_krw - self.counters.loss_krw,
            trade_count: self.counters.trade_count,
            success_count: self.counters.success_count,
            fail_count: self.counters.fail_count,
            success_rate_pct,
            exposure_krw: self.exposure_krw(),
            active_trades: self.active.len(),
            emergency_stopped: self.emergency_reason.is_some(),
        }
    }

    /// Seed counters directly. Test and drill support.
    pub fn seed_counters(&mut self, counters: DailyCounters) {
        self.counters = counters;
    }

    fn roll_if_new_day(&mut self, today: NaiveDate) {
        if today > self.day_key {
            info!("Resetting daily risk counters for {}", today);
            self.counters = DailyCounters::default();
            self.day_key = today;
        }
    }
}
