//! Typed event sinks.
//!
//! The orchestrator pushes premium ticks, trade outcomes, risk metrics,
//! balance snapshots and alerts to every attached sink. The log sink is
//! always present; a dashboard sink is optional and the core behaves
//! identically without one.

use kimp_core::PremiumSnapshot;
use kimp_executor::Trade;
use kimp_risk::RiskMetrics;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Danger,
}

/// One event pushed to the sinks.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Premium(PremiumSnapshot),
    Trade(Box<Trade>),
    Metrics(RiskMetrics),
    Balances {
        upbit_krw: Decimal,
        binance_usdt: Decimal,
    },
    Alert {
        level: AlertLevel,
        message: String,
    },
}

/// Push-style observer. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Fan-out over all attached sinks.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn EventSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn publish(&self, event: Event) {
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }
}

/// Structured-log sink.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &Event) {
        match event {
            Event::Premium(snapshot) => {
                info!(
                    "{} - Upbit: {} KRW, Binance: {} KRW, Premium: {:.2}%{}",
                    snapshot.symbol,
                    snapshot.price_krw,
                    snapshot.price_usdt_krw.round_dp(0),
                    snapshot.premium_pct,
                    if snapshot.stale { " (stale rate)" } else { "" }
                );
            }
            Event::Trade(trade) => {
                info!(
                    "Trade {} {}: {:?} in state {}, profit {} KRW over {} steps",
                    trade.id,
                    trade.opportunity.direction,
                    trade.outcome,
                    trade.state,
                    trade.realized_profit_krw,
                    trade.steps.len()
                );
            }
            Event::Metrics(metrics) => {
                info!(
                    "Daily metrics - Volume: {} KRW, Net profit: {} KRW, Success rate: {:.1}%, Active: {}, Exposure: {} KRW",
                    metrics.daily_volume_krw,
                    metrics.net_profit_krw,
                    metrics.success_rate_pct,
                    metrics.active_trades,
                    metrics.exposure_krw
                );
            }
            Event::Balances {
                upbit_krw,
                binance_usdt,
            } => {
                info!(
                    "Balances - Upbit: {} KRW, Binance: {} USDT",
                    upbit_krw, binance_usdt
                );
            }
            Event::Alert { level, message } => match level {
                AlertLevel::Info => debug!("{message}"),
                AlertLevel::Warning => warn!("{message}"),
                AlertLevel::Danger => error!("{message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    impl EventSink for CountingSink {
        fn publish(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fan_out_reaches_all_sinks() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let mut sinks = SinkSet::new();
        sinks.attach(Box::new(CountingSink(Arc::clone(&count_a))));
        sinks.attach(Box::new(CountingSink(Arc::clone(&count_b))));

        sinks.publish(Event::Alert {
            level: AlertLevel::Info,
            message: "hello".into(),
        });
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_sink_set_is_fine() {
        let sinks = SinkSet::new();
        sinks.publish(Event::Alert {
            level: AlertLevel::Warning,
            message: "nobody listening".into(),
        });
    }
}
