//! Risk manager actor.
//!
//! One task owns the [`RiskLedger`]; every public operation is a message
//! with a oneshot reply, so admission and completion are serialized and
//! concurrent strategies cannot race the counters.

use crate::{RiskLedger, RiskLimits, RiskMetrics};
use chrono::Local;
use compact_str::CompactString;
use kimp_core::{Opportunity, TradeSide};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

enum RiskMessage {
    Admit {
        opportunity: Box<Opportunity>,
        reply: oneshot::Sender<(bool, String)>,
    },
    RegisterStart {
        trade_id: CompactString,
        opportunity: Box<Opportunity>,
        reply: oneshot::Sender<()>,
    },
    RegisterEnd {
        trade_id: CompactString,
        realized_profit_krw: Decimal,
        success: bool,
        reply: oneshot::Sender<()>,
    },
    EmergencyCheck {
        reply: oneshot::Sender<(bool, String)>,
    },
    EmergencyReset {
        reply: oneshot::Sender<()>,
    },
    Slippage {
        expected: Decimal,
        actual: Decimal,
        side: TradeSide,
        reply: oneshot::Sender<(bool, Decimal)>,
    },
    Metrics {
        reply: oneshot::Sender<RiskMetrics>,
    },
    ValidateBalances {
        upbit_krw: Decimal,
        binance_usdt: Decimal,
        fiat_rate: Option<Decimal>,
        reply: oneshot::Sender<(bool, String)>,
    },
    SafeTradeAmount {
        opportunity: Box<Opportunity>,
        available_krw: Decimal,
        available_usdt: Decimal,
        fiat_rate: Option<Decimal>,
        reply: oneshot::Sender<Decimal>,
    },
}

/// Cloneable handle to the risk actor.
#[derive(Clone)]
pub struct RiskHandle {
    tx: mpsc::Sender<RiskMessage>,
}

/// Spawns the actor task that owns the risk state.
pub struct RiskManager;

impl RiskManager {
    /// Start the actor. It runs until the last handle is dropped.
    pub fn spawn(limits: RiskLimits) -> RiskHandle {
        let (tx, mut rx) = mpsc::channel(64);
        let mut ledger = RiskLedger::new(limits, Local::now().date_naive());

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let today = Local::now().date_naive();
                match message {
                    RiskMessage::Admit { opportunity, reply } => {
                        let verdict = ledger.can_execute(&opportunity, today);
                        if !verdict.0 {
                            debug!("Trade rejected: {}", verdict.1);
                        }
                        let _ = reply.send(verdict);
                    }
                    RiskMessage::RegisterStart {
                        trade_id,
                        opportunity,
                        reply,
                    } => {
                        ledger.register_start(&trade_id, &opportunity);
                        let _ = reply.send(());
                    }
                    RiskMessage::RegisterEnd {
                        trade_id,
                        realized_profit_krw,
                        success,
                        reply,
                    } => {
                        ledger.register_end(&trade_id, realized_profit_krw, success);
                        let _ = reply.send(());
                    }
                    RiskMessage::EmergencyCheck { reply } => {
                        let _ = reply.send(ledger.check_emergency_stop());
                    }
                    RiskMessage::EmergencyReset { reply } => {
                        ledger.reset_emergency_stop();
                        let _ = reply.send(());
                    }
                    RiskMessage::Slippage {
                        expected,
                        actual,
                        side,
                        reply,
                    } => {
                        let _ = reply.send(ledger.check_slippage(expected, actual, side));
                    }
                    RiskMessage::Metrics { reply } => {
                        let _ = reply.send(ledger.metrics(today));
                    }
                    RiskMessage::ValidateBalances {
                        upbit_krw,
                        binance_usdt,
                        fiat_rate,
                        reply,
                    } => {
                        let _ =
                            reply.send(ledger.validate_balances(upbit_krw, binance_usdt, fiat_rate));
                    }
                    RiskMessage::SafeTradeAmount {
                        opportunity,
                        available_krw,
                        available_usdt,
                        fiat_rate,
                        reply,
                    } => {
                        let _ = reply.send(ledger.safe_trade_amount(
                            &opportunity,
                            available_krw,
                            available_usdt,
                            fiat_rate,
                        ));
                    }
                }
            }
        });

        RiskHandle { tx }
    }
}

impl RiskHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> RiskMessage,
        fallback: impl FnOnce() -> R,
    ) -> R {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).await.is_err() {
            return fallback();
        }
        rx.await.unwrap_or_else(|_| fallback())
    }

    /// Admission check. Fails closed if the actor is gone.
    pub async fn can_execute(&self, opportunity: &Opportunity) -> (bool, String) {
        let opportunity = Box::new(opportunity.clone());
        self.request(
            |reply| RiskMessage::Admit { opportunity, reply },
            || (false, "Risk manager unavailable".to_string()),
        )
        .await
    }

    pub async fn register_start(&self, trade_id: &str, opportunity: &Opportunity) {
        let trade_id = CompactString::new(trade_id);
        let opportunity = Box::new(opportunity.clone());
        self.request(
            |reply| RiskMessage::RegisterStart {
                trade_id,
                opportunity,
                reply,
            },
            || (),
        )
        .await
    }

    pub async fn register_end(&self, trade_id: &str, realized_profit_krw: Decimal, success: bool) {
        let trade_id = CompactString::new(trade_id);
        self.request(
            |reply| RiskMessage::RegisterEnd {
                trade_id,
                realized_profit_krw,
                success,
                reply,
            },
            || (),
        )
        .await
    }

    pub async fn check_emergency_stop(&self) -> (bool, String) {
        self.request(
            |reply| RiskMessage::EmergencyCheck { reply },
            || (true, "Risk manager unavailable".to_string()),
        )
        .await
    }

    pub async fn reset_emergency_stop(&self) {
        self.request(|reply| RiskMessage::EmergencyReset { reply }, || ())
            .await
    }

    pub async fn check_slippage(
        &self,
        expected: Decimal,
        actual: Decimal,
        side: TradeSide,
    ) -> (bool, Decimal) {
        self.request(
            |reply| RiskMessage::Slippage {
                expected,
                actual,
                side,
                reply,
            },
            || (false, Decimal::ZERO),
        )
        .await
    }

    pub async fn metrics(&self) -> RiskMetrics {
        self.request(
            |reply| RiskMessage::Metrics { reply },
            || RiskMetrics {
                daily_volume_krw: Decimal::ZERO,
                daily_profit_krw: Decimal::ZERO,
                daily_loss_krw: Decimal::ZERO,
                net_profit_krw: Decimal::ZERO,
                trade_count: 0,
                success_count: 0,
                fail_count: 0,
                success_rate_pct: Decimal::ZERO,
                exposure_krw: Decimal::ZERO,
                active_trades: 0,
                emergency_stopped: false,
            },
        )
        .await
    }

    pub async fn validate_balances(
        &self,
        upbit_krw: Decimal,
        binance_usdt: Decimal,
        fiat_rate: Option<Decimal>,
    ) -> (bool, String) {
        self.request(
            |reply| RiskMessage::ValidateBalances {
                upbit_krw,
                binance_usdt,
                fiat_rate,
                reply,
            },
            || (false, "Risk manager unavailable".to_string()),
        )
        .await
    }

    pub async fn safe_trade_amount(
        &self,
        opportunity: &Opportunity,
        available_krw: Decimal,
        available_usdt: Decimal,
        fiat_rate: Option<Decimal>,
    ) -> Decimal {
        let opportunity = Box::new(opportunity.clone());
        self.request(
            |reply| RiskMessage::SafeTradeAmount {
                opportunity,
                available_krw,
                available_usdt,
                fiat_rate,
                reply,
            },
            || Decimal::ZERO,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kimp_core::Direction;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn opportunity(sized_krw: Decimal) -> Opportunity {
        Opportunity {
            symbol: CompactString::new("BTC"),
            direction: Direction::Reverse,
            premium_pct: dec!(1.01),
            tether_premium_pct: dec!(0.3),
            est_fees_pct: dec!(0.4),
            safety_margin_pct: dec!(0.1),
            expected_profit_pct: dec!(0.71),
            sized_amount_krw: sized_krw,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_admission_over_single_trade_limit() {
        let handle = RiskManager::spawn(RiskLimits {
            max_single_trade_krw: dec!(500000),
            ..Default::default()
        });

        let (ok, reason) = handle.can_execute(&opportunity(dec!(1000000))).await;
        assert!(!ok);
        assert_eq!(reason, "Trade amount exceeds single trade limit");
    }

    #[tokio::test]
    async fn test_fourth_admission_rejected_at_three_active() {
        let handle = RiskManager::spawn(RiskLimits {
            max_concurrent_trades: 3,
            ..Default::default()
        });

        for i in 0..3 {
            let opp = opportunity(dec!(1000000));
            let (ok, _) = handle.can_execute(&opp).await;
            assert!(ok);
            handle.register_start(&format!("trade-{i}"), &opp).await;
        }

        let (ok, reason) = handle.can_execute(&opportunity(dec!(1000000))).await;
        assert!(!ok);
        assert_eq!(reason, "Maximum concurrent trades reached");
    }

    #[tokio::test]
    async fn test_register_end_frees_slot() {
        let handle = RiskManager::spawn(RiskLimits {
            max_concurrent_trades: 1,
            ..Default::default()
        });

        let opp = opportunity(dec!(1000000));
        handle.register_start("t1", &opp).await;
        assert!(!handle.can_execute(&opp).await.0);

        handle.register_end("t1", dec!(5000), true).await;
        assert!(handle.can_execute(&opp).await.0);

        let metrics = handle.metrics().await;
        assert_eq!(metrics.daily_volume_krw, dec!(1000000));
        assert_eq!(metrics.exposure_krw, Decimal::ZERO);
        assert_eq!(metrics.success_count, 1);
    }

    #[tokio::test]
    async fn test_admissions_cap_at_concurrent_limit() {
        let handle = RiskManager::spawn(RiskLimits {
            max_concurrent_trades: 2,
            ..Default::default()
        });

        let mut admitted = 0;
        for i in 0..8 {
            let opp = opportunity(dec!(1000000));
            let (ok, _) = handle.can_execute(&opp).await;
            if ok {
                handle.register_start(&format!("slot-{i}"), &opp).await;
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);

        let metrics = handle.metrics().await;
        assert_eq!(metrics.active_trades, 2);
        assert_eq!(metrics.exposure_krw, dec!(2000000));
    }

    #[tokio::test]
    async fn test_emergency_check_and_reset_via_handle() {
        let handle = RiskManager::spawn(RiskLimits::default());

        // Drive a loss ratio over the 3% limit: one failed 10M trade losing
        // 400k of volume.
        let opp = opportunity(dec!(10000000));
        handle.register_start("bleed", &opp).await;
        handle.register_end("bleed", dec!(-400000), false).await;

        let (tripped, reason) = handle.check_emergency_stop().await;
        assert!(tripped);
        assert!(reason.contains("Daily loss 4.00%"));

        let (ok, reason) = handle.can_execute(&opportunity(dec!(1000))).await;
        assert!(!ok);
        assert!(reason.starts_with("Emergency stop active"));

        handle.reset_emergency_stop().await;
        let (ok, _) = handle.can_execute(&opportunity(dec!(1000))).await;
        assert!(ok);
    }
}
