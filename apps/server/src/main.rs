//! kimp-bot — KRW/USDT cross-exchange arbitrage engine.
//!
//! One long-running foreground process: builds the venue clients, the rate
//! provider, the risk actor and both strategies, then hands control to the
//! orchestrator until SIGINT/SIGTERM.

mod config;
mod orchestrator;
mod rate_sources;
mod report;
mod sink;
mod venues;

use clap::Parser;
use config::{AppConfig, ConfigError};
use kimp_core::Venue;
use kimp_engine::{FiatRateProvider, PremiumCalculator};
use kimp_executor::{ForwardStrategy, ReverseStrategy, StrategyConfig, StrategyEnv};
use kimp_risk::RiskManager;
use kimp_venues::{PaperLedger, PaperVenue, VenueClient};
use orchestrator::{Orchestrator, OrchestratorConfig};
use rust_decimal::Decimal;
use sink::{LogSink, SinkSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initial virtual balances for paper mode.
const PAPER_KRW: u64 = 10_000_000;
const PAPER_USDT: u64 = 10_000;

/// kimp-bot CLI.
#[derive(Parser, Debug)]
#[command(name = "kimp-bot")]
#[command(about = "KRW/USDT cross-exchange arbitrage bot", long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error
    #[arg(short, long)]
    log_level: Option<String>,

    /// Paper-trading mode (virtual balances, no live orders)
    #[arg(long)]
    dry_run: bool,

    /// Paper-state document path
    #[arg(long)]
    paper_state: Option<String>,
}

fn init_logging(level: &str, log_file: Option<&str>) {
    // Apply the requested level to our crates while capping noisy
    // dependencies (hyper, reqwest, rustls) at warn.
    let filter = EnvFilter::try_new(format!(
        "{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn,tower=warn"
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .compact(),
    );
    match log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    }) {
        Some(file) => registry
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .init(),
        None => registry.init(),
    }
}

/// Build the venue pair for the configured mode.
///
/// Paper mode decorates the public market-data bindings with the virtual
/// ledger. Live mode needs the authenticated bindings, which are deployed
/// separately from this tree.
fn build_clients(
    config: &AppConfig,
) -> Result<(Arc<dyn VenueClient>, Arc<dyn VenueClient>, Option<Arc<PaperLedger>>), ConfigError> {
    if !config.dry_run {
        return Err(ConfigError::Contradictory(
            "live trading requires the authenticated venue bindings; run with DRY_RUN=true"
                .to_string(),
        ));
    }
    let upbit_public = venues::UpbitPublic::new()
        .map_err(|e| ConfigError::Contradictory(e.to_string()))?;
    let binance_public = venues::BinancePublic::new(config.testnet)
        .map_err(|e| ConfigError::Contradictory(e.to_string()))?;

    let ledger = PaperLedger::new(
        &[
            (Venue::Upbit, "KRW", Decimal::from(PAPER_KRW)),
            (Venue::Binance, "USDT", Decimal::from(PAPER_USDT)),
        ],
        Some(config.paper_state_path.clone().into()),
    );
    let upbit: Arc<dyn VenueClient> = Arc::new(PaperVenue::new(
        Arc::new(upbit_public),
        Arc::clone(&ledger),
    ));
    let binance: Arc<dyn VenueClient> = Arc::new(PaperVenue::new(
        Arc::new(binance_public),
        Arc::clone(&ledger),
    ));
    Ok((upbit, binance, Some(ledger)))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(path) = args.paper_state {
        config.paper_state_path = path;
    }

    init_logging(&config.log_level, config.log_file.as_deref());

    if let Err(e) = config.validate() {
        error!("Configuration error: {e}");
        std::process::exit(1);
    }

    info!("Starting kimp-bot");
    info!("  Mode: {}", if config.dry_run { "paper" } else { "live" });
    info!("  Safety margin: {}%", config.safety_margin_pct);
    info!(
        "  Trade window: {} - {} KRW",
        config.min_trade_amount_krw, config.max_trade_amount_krw
    );
    info!(
        "  Risk: max daily {} KRW, max concurrent {}, emergency loss {}%",
        config.max_daily_volume_krw, config.max_concurrent_trades, config.emergency_loss_pct
    );
    info!(
        "  Coins: {}",
        if config.monitor_coins.is_empty() {
            "all tradable on both venues".to_string()
        } else {
            config.monitor_coins.join(", ")
        }
    );

    let (upbit, binance, ledger) = match build_clients(&config) {
        Ok(clients) => clients,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // Credential/liveness pre-flight on both venues.
    for client in [&upbit, &binance] {
        match client.verify_access().await {
            Ok(message) => info!("{} verified: {}", client.venue(), message),
            Err(e) => {
                error!("{} verification failed: {}", client.venue(), e);
                std::process::exit(1);
            }
        }
    }

    let rates = Arc::new(
        FiatRateProvider::new(rate_sources::default_sources())
            .with_cache_duration(config.fiat_rate_cache_duration),
    );
    match rates.current().await {
        Ok(rate) => info!("Initial USD/KRW rate: {}", rate.rate),
        Err(e) => warn!("Initial exchange rate fetch failed: {e}"),
    }

    let risk = RiskManager::spawn(config.risk_limits());
    let calculator = Arc::new(PremiumCalculator::new(
        Arc::clone(&upbit),
        Arc::clone(&binance),
        Arc::clone(&rates),
    ));

    let strategy_config = StrategyConfig {
        transfer_timeout: config.transfer_timeout,
        ..Default::default()
    };
    let strategy_env = |risk: kimp_risk::RiskHandle| StrategyEnv {
        upbit: Arc::clone(&upbit),
        binance: Arc::clone(&binance),
        rates: Arc::clone(&rates),
        risk,
        config: strategy_config,
    };
    let forward = Arc::new(ForwardStrategy::new(strategy_env(risk.clone())));
    let reverse = Arc::new(ReverseStrategy::new(strategy_env(risk.clone())));

    let mut sinks = SinkSet::new();
    sinks.attach(Box::new(LogSink));
    let sinks = Arc::new(sinks);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(
        Arc::clone(&upbit),
        Arc::clone(&binance),
        calculator,
        Arc::clone(&rates),
        risk,
        forward,
        reverse,
        sinks,
        OrchestratorConfig {
            price_update_interval: config.price_update_interval,
            safety_margin_pct: config.safety_margin_pct,
            min_trade_amount_krw: config.min_trade_amount_krw,
            max_trade_amount_krw: config.max_trade_amount_krw,
            monitor_coins: config.monitor_coins.clone(),
        },
        shutdown_rx,
    );
    let run_handle = tokio::spawn(orchestrator.run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }
    // A second signal is a no-op: the watch channel already reads true.
    let _ = shutdown_tx.send(true);

    let _ = run_handle.await;

    if let Some(ledger) = ledger {
        let rate = rates
            .current()
            .await
            .map(|r| r.rate)
            .unwrap_or_else(|_| Decimal::from(1300u64));
        let initial = Decimal::from(PAPER_KRW) + Decimal::from(PAPER_USDT) * rate;
        let report = report::build_report(&ledger, initial, rate);
        report::write_report(&report, "paper_session_report.json");
    }

    info!("Clean shutdown");
}
