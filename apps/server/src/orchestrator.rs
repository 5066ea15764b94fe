//! The monitor-and-dispatch core.
//!
//! Owns the coin universe (the intersection of both venues' markets), runs
//! the premium, opportunity, metrics and health loops, gates opportunities
//! through the risk manager and hands approved ones to a strategy on their
//! own task. Loop errors are logged and reported; the orchestrator itself
//! never aborts.

use crate::sink::{AlertLevel, Event, SinkSet};
use chrono::Utc;
use compact_str::CompactString;
use dashmap::{DashMap, DashSet};
use kimp_core::{Direction, Opportunity};
use kimp_engine::{EngineError, FiatRateProvider, PremiumCalculator};
use kimp_executor::{ForwardStrategy, ReverseStrategy, TradeOutcome};
use kimp_risk::RiskHandle;
use kimp_venues::VenueClient;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Consecutive order-book failures before a symbol is disabled.
const MAX_BOOK_FAILURES: u32 = 5;
/// Universe refresh cadence.
const UNIVERSE_REFRESH: Duration = Duration::from_secs(30 * 60);
/// Metrics loop cadence.
const METRICS_INTERVAL: Duration = Duration::from_secs(30);
/// Health loop cadence.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);
/// Back-off after an emergency stop before re-checking.
const EMERGENCY_BACKOFF: Duration = Duration::from_secs(60);

/// Orchestrator tuning taken from the app config.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub price_update_interval: Duration,
    pub safety_margin_pct: Decimal,
    pub min_trade_amount_krw: Decimal,
    pub max_trade_amount_krw: Decimal,
    /// Restrict the universe; empty means the full intersection.
    pub monitor_coins: Vec<String>,
}

pub struct Orchestrator {
    upbit: Arc<dyn VenueClient>,
    binance: Arc<dyn VenueClient>,
    calculator: Arc<PremiumCalculator>,
    rates: Arc<FiatRateProvider>,
    risk: RiskHandle,
    forward: Arc<ForwardStrategy>,
    reverse: Arc<ReverseStrategy>,
    sinks: Arc<SinkSet>,
    config: OrchestratorConfig,
    universe: RwLock<Vec<CompactString>>,
    book_failures: DashMap<CompactString, u32>,
    disabled: DashSet<CompactString>,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upbit: Arc<dyn VenueClient>,
        binance: Arc<dyn VenueClient>,
        calculator: Arc<PremiumCalculator>,
        rates: Arc<FiatRateProvider>,
        risk: RiskHandle,
        forward: Arc<ForwardStrategy>,
        reverse: Arc<ReverseStrategy>,
        sinks: Arc<SinkSet>,
        config: OrchestratorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            upbit,
            binance,
            calculator,
            rates,
            risk,
            forward,
            reverse,
            sinks,
            config,
            universe: RwLock::new(Vec::new()),
            book_failures: DashMap::new(),
            disabled: DashSet::new(),
            shutdown,
        })
    }

    /// Run all loops until shutdown. Trades in flight outlive the loops and
    /// report through the risk manager before their tasks end.
    pub async fn run(self: Arc<Self>) {
        self.refresh_universe().await;

        let mut handles = Vec::new();
        handles.push(tokio::spawn(Arc::clone(&self).universe_loop()));
        handles.push(tokio::spawn(Arc::clone(&self).premium_loop()));
        handles.push(tokio::spawn(Arc::clone(&self).opportunity_loop()));
        handles.push(tokio::spawn(Arc::clone(&self).metrics_loop()));
        handles.push(tokio::spawn(Arc::clone(&self).health_loop()));

        for handle in handles {
            let _ = handle.await;
        }
        info!("Orchestrator stopped");
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep that wakes early on shutdown. Returns false when shutting down.
    async fn idle(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_shutdown(),
            _ = shutdown.changed() => false,
        }
    }

    /// Current enabled universe.
    pub async fn active_symbols(&self) -> Vec<CompactString> {
        self.universe
            .read()
            .await
            .iter()
            .filter(|symbol| !self.disabled.contains(*symbol))
            .cloned()
            .collect()
    }

    /// Rebuild the universe from the venue market lists.
    pub async fn refresh_universe(&self) {
        let (upbit_markets, binance_markets) =
            tokio::join!(self.upbit.list_markets(), self.binance.list_markets());
        let (upbit_markets, binance_markets) = match (upbit_markets, binance_markets) {
            (Ok(u), Ok(b)) => (u, b),
            (u, b) => {
                warn!(
                    "Universe refresh failed: upbit={:?} binance={:?}",
                    u.err().map(|e| e.to_string()),
                    b.err().map(|e| e.to_string())
                );
                return;
            }
        };

        let binance_set: HashSet<CompactString> = binance_markets.into_iter().collect();
        let mut next: Vec<CompactString> = upbit_markets
            .into_iter()
            .filter(|symbol| binance_set.contains(symbol))
            .filter(|symbol| symbol != "USDT")
            .collect();
        if !self.config.monitor_coins.is_empty() {
            let configured: HashSet<&str> = self
                .config
                .monitor_coins
                .iter()
                .map(String::as_str)
                .collect();
            next.retain(|symbol| configured.contains(symbol.as_str()));
        }
        next.sort();

        let mut universe = self.universe.write().await;
        let previous: HashSet<CompactString> = universe.iter().cloned().collect();
        let current: HashSet<CompactString> = next.iter().cloned().collect();
        for added in current.difference(&previous) {
            info!("Coin added to monitoring: {added}");
        }
        for removed in previous.difference(&current) {
            warn!("Coin removed from monitoring: {removed}");
        }
        info!("Monitoring {} coins on both venues", next.len());
        *universe = next;
    }

    async fn universe_loop(self: Arc<Self>) {
        while self.idle(UNIVERSE_REFRESH).await {
            self.refresh_universe().await;
        }
    }

    /// Per-tick premium logging for every enabled symbol plus the tether
    /// premium itself.
    async fn premium_loop(self: Arc<Self>) {
        loop {
            for symbol in self.active_symbols().await {
                match self.calculator.premium(&symbol).await {
                    Ok(snapshot) => {
                        self.book_failures.remove(&symbol);
                        self.sinks.publish(Event::Premium(snapshot));
                    }
                    Err(EngineError::FiatUnavailable) => {
                        // No conversion possible this tick for any symbol.
                        warn!("Exchange rate unavailable, premium checks paused");
                        break;
                    }
                    Err(EngineError::Venue(e)) => {
                        debug!("Premium failed for {symbol}: {e}");
                        self.note_symbol_failure(&symbol);
                    }
                }
            }
            match self.calculator.tether_premium().await {
                Ok(snapshot) => self.sinks.publish(Event::Premium(snapshot)),
                Err(e) => debug!("Tether premium failed: {e}"),
            }
            if !self.idle(self.config.price_update_interval).await {
                return;
            }
        }
    }

    /// Detect, gate and dispatch opportunities.
    async fn opportunity_loop(self: Arc<Self>) {
        loop {
            let (tripped, reason) = self.risk.check_emergency_stop().await;
            if tripped {
                self.sinks.publish(Event::Alert {
                    level: AlertLevel::Danger,
                    message: reason,
                });
                if !self.idle(EMERGENCY_BACKOFF).await {
                    return;
                }
                continue;
            }

            for symbol in self.active_symbols().await {
                let checked = self
                    .calculator
                    .check_opportunity(
                        &symbol,
                        self.config.safety_margin_pct,
                        self.config.min_trade_amount_krw,
                        self.config.max_trade_amount_krw,
                    )
                    .await;
                match checked {
                    Ok(Some(opportunity)) => {
                        let (approved, reason) = self.risk.can_execute(&opportunity).await;
                        if approved {
                            info!(
                                "Arbitrage opportunity: {} {} at {:.4}% net, sized {} KRW",
                                opportunity.symbol,
                                opportunity.direction,
                                opportunity.net_profit_pct(),
                                opportunity.sized_amount_krw
                            );
                            self.dispatch(opportunity);
                        } else {
                            debug!("Trade rejected: {reason}");
                        }
                    }
                    Ok(None) => {}
                    Err(EngineError::FiatUnavailable) => {
                        warn!("Exchange rate unavailable, opportunity checks paused");
                        break;
                    }
                    Err(EngineError::Venue(e)) => {
                        debug!("Opportunity check failed for {symbol}: {e}");
                        self.note_symbol_failure(&symbol);
                    }
                }
            }
            if !self.idle(self.config.price_update_interval).await {
                return;
            }
        }
    }

    /// Register with the risk manager and run the matching strategy on its
    /// own task. `RegisterEnd` fires exactly once per dispatched trade.
    fn dispatch(&self, opportunity: Opportunity) {
        let trade_id = format!(
            "{}_{}",
            opportunity.symbol,
            Utc::now().timestamp_millis()
        );
        let risk = self.risk.clone();
        let forward = Arc::clone(&self.forward);
        let reverse = Arc::clone(&self.reverse);
        let sinks = Arc::clone(&self.sinks);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            risk.register_start(&trade_id, &opportunity).await;
            let trade = match opportunity.direction {
                Direction::Forward => forward.execute(opportunity, shutdown).await,
                Direction::Reverse => reverse.execute(opportunity, shutdown).await,
            };
            let success = trade.outcome == Some(TradeOutcome::Completed);
            risk.register_end(&trade_id, trade.realized_profit_krw, success)
                .await;
            if trade.outcome == Some(TradeOutcome::Failed) {
                sinks.publish(Event::Alert {
                    level: AlertLevel::Danger,
                    message: format!(
                        "Trade {} failed in state {}: {}",
                        trade.id,
                        trade.state,
                        trade.error.as_deref().unwrap_or("unknown")
                    ),
                });
            }
            sinks.publish(Event::Trade(Box::new(trade)));
        });
    }

    async fn metrics_loop(self: Arc<Self>) {
        loop {
            let metrics = self.risk.metrics().await;
            self.sinks.publish(Event::Metrics(metrics));
            if !self.idle(METRICS_INTERVAL).await {
                return;
            }
        }
    }

    /// Balance and rate-availability watchdog.
    async fn health_loop(self: Arc<Self>) {
        loop {
            self.check_health().await;
            if !self.idle(HEALTH_INTERVAL).await {
                return;
            }
        }
    }

    async fn check_health(&self) {
        let (upbit_krw, binance_usdt) = tokio::join!(
            self.upbit.balance("KRW"),
            self.binance.balance("USDT")
        );
        let (upbit_krw, binance_usdt) = match (upbit_krw, binance_usdt) {
            (Ok(u), Ok(b)) => (u.total(), b.total()),
            (u, b) => {
                warn!(
                    "Balance check failed: upbit={:?} binance={:?}",
                    u.err().map(|e| e.to_string()),
                    b.err().map(|e| e.to_string())
                );
                return;
            }
        };

        let rate = self.rates.current().await.ok();
        if rate.is_none() {
            self.sinks.publish(Event::Alert {
                level: AlertLevel::Warning,
                message: "Exchange rate unavailable - trading paused".to_string(),
            });
        }

        let (ok, message) = self
            .risk
            .validate_balances(upbit_krw, binance_usdt, rate.map(|r| r.rate))
            .await;
        if !ok {
            self.sinks.publish(Event::Alert {
                level: AlertLevel::Warning,
                message,
            });
        }
        self.sinks.publish(Event::Balances {
            upbit_krw,
            binance_usdt,
        });
    }

    /// Count a consecutive failure against a symbol; disable it at the
    /// threshold until restart.
    fn note_symbol_failure(&self, symbol: &CompactString) {
        let mut failures = self.book_failures.entry(symbol.clone()).or_insert(0);
        *failures += 1;
        if *failures >= MAX_BOOK_FAILURES && self.disabled.insert(symbol.clone()) {
            warn!(
                "Disabling {symbol} after {MAX_BOOK_FAILURES} consecutive order-book failures \
                 (check API permissions or IP allowlist)"
            );
        }
    }
}
