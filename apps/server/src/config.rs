//! Application configuration.
//!
//! Credentials and tuning come from the environment (a `.env` file is
//! loaded when present); a handful of CLI flags override the basics.
//! Validation failures are fatal at startup.

use kimp_risk::RiskLimits;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. All fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Contradictory limits: {0}")]
    Contradictory(String),
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upbit_access_key: String,
    pub upbit_secret_key: String,
    pub binance_api_key: String,
    pub binance_secret_key: String,

    pub safety_margin_pct: Decimal,
    pub min_trade_amount_krw: Decimal,
    pub max_trade_amount_krw: Decimal,
    /// Restrict the universe; empty means the full intersection.
    pub monitor_coins: Vec<String>,

    pub max_slippage_pct: Decimal,
    pub emergency_loss_pct: Decimal,
    pub max_exposure_pct: Decimal,
    pub max_concurrent_trades: usize,
    pub max_daily_volume_krw: Decimal,
    pub min_venue_balance_krw: Decimal,

    pub price_update_interval: Duration,
    pub transfer_timeout: Duration,
    pub fiat_rate_cache_duration: Duration,

    pub log_level: String,
    pub log_file: Option<String>,

    pub testnet: bool,
    pub dry_run: bool,
    /// Paper-state document path, used in dry-run mode only.
    pub paper_state_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upbit_access_key: String::new(),
            upbit_secret_key: String::new(),
            binance_api_key: String::new(),
            binance_secret_key: String::new(),
            safety_margin_pct: Decimal::from_str("1.5").unwrap(),
            min_trade_amount_krw: Decimal::from(100_000u64),
            max_trade_amount_krw: Decimal::from(5_000_000u64),
            monitor_coins: Vec::new(),
            max_slippage_pct: Decimal::from_str("0.5").unwrap(),
            emergency_loss_pct: Decimal::from(3u64),
            max_exposure_pct: Decimal::from(30u64),
            max_concurrent_trades: 3,
            max_daily_volume_krw: Decimal::from(50_000_000u64),
            min_venue_balance_krw: Decimal::from(1_000_000u64),
            price_update_interval: Duration::from_secs(1),
            transfer_timeout: Duration::from_secs(30 * 60),
            fiat_rate_cache_duration: Duration::from_secs(300),
            log_level: "info".to_string(),
            log_file: None,
            testnet: false,
            dry_run: false,
            paper_state_path: "paper_state.json".to_string(),
        }
    }
}

fn env_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &'static str, current: T) -> Result<T, ConfigError> {
    match env_var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        None => Ok(current),
    }
}

fn parse_env_secs(name: &'static str, current: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_env(name, current.as_secs())?))
}

impl AppConfig {
    /// Build from the process environment over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let monitor_coins = env_var("MONITOR_COINS")
            .map(|raw| {
                raw.split(',')
                    .map(|coin| coin.trim().to_ascii_uppercase())
                    .filter(|coin| !coin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            upbit_access_key: env_var("UPBIT_ACCESS_KEY").unwrap_or_default(),
            upbit_secret_key: env_var("UPBIT_SECRET_KEY").unwrap_or_default(),
            binance_api_key: env_var("BINANCE_API_KEY").unwrap_or_default(),
            binance_secret_key: env_var("BINANCE_SECRET_KEY").unwrap_or_default(),
            safety_margin_pct: parse_env("SAFETY_MARGIN_PCT", defaults.safety_margin_pct)?,
            min_trade_amount_krw: parse_env(
                "MIN_TRADE_AMOUNT_KRW",
                defaults.min_trade_amount_krw,
            )?,
            max_trade_amount_krw: parse_env(
                "MAX_TRADE_AMOUNT_KRW",
                defaults.max_trade_amount_krw,
            )?,
            monitor_coins,
            max_slippage_pct: parse_env("MAX_SLIPPAGE_PCT", defaults.max_slippage_pct)?,
            emergency_loss_pct: parse_env("EMERGENCY_LOSS_PCT", defaults.emergency_loss_pct)?,
            max_exposure_pct: parse_env("MAX_EXPOSURE_PCT", defaults.max_exposure_pct)?,
            max_concurrent_trades: parse_env(
                "MAX_CONCURRENT_TRADES",
                defaults.max_concurrent_trades,
            )?,
            max_daily_volume_krw: parse_env(
                "MAX_DAILY_VOLUME_KRW",
                defaults.max_daily_volume_krw,
            )?,
            min_venue_balance_krw: parse_env(
                "MIN_VENUE_BALANCE_KRW",
                defaults.min_venue_balance_krw,
            )?,
            price_update_interval: parse_env_secs(
                "PRICE_UPDATE_INTERVAL_SEC",
                defaults.price_update_interval,
            )?,
            transfer_timeout: Duration::from_secs(
                parse_env("TRANSFER_TIMEOUT_MINUTES", 30u64)? * 60,
            ),
            fiat_rate_cache_duration: parse_env_secs(
                "FIAT_RATE_CACHE_DURATION_SEC",
                defaults.fiat_rate_cache_duration,
            )?,
            log_level: env_var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_file: env_var("LOG_FILE"),
            testnet: parse_env("TESTNET", defaults.testnet)?,
            dry_run: parse_env("DRY_RUN", defaults.dry_run)?,
            paper_state_path: env_var("PAPER_STATE_PATH").unwrap_or(defaults.paper_state_path),
        })
    }

    /// Reject missing credentials and contradictory limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dry_run {
            if self.upbit_access_key.is_empty() || self.upbit_secret_key.is_empty() {
                return Err(ConfigError::MissingCredential("UPBIT_ACCESS_KEY"));
            }
            if self.binance_api_key.is_empty() || self.binance_secret_key.is_empty() {
                return Err(ConfigError::MissingCredential("BINANCE_API_KEY"));
            }
        }
        if self.min_trade_amount_krw >= self.max_trade_amount_krw {
            return Err(ConfigError::Contradictory(
                "MIN_TRADE_AMOUNT_KRW must be less than MAX_TRADE_AMOUNT_KRW".to_string(),
            ));
        }
        if self.safety_margin_pct <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                name: "SAFETY_MARGIN_PCT",
                value: self.safety_margin_pct.to_string(),
            });
        }
        self.risk_limits()
            .validate()
            .map_err(|e| ConfigError::Contradictory(e.to_string()))?;
        Ok(())
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_single_trade_krw: self.max_trade_amount_krw,
            max_daily_volume_krw: self.max_daily_volume_krw,
            max_concurrent_trades: self.max_concurrent_trades,
            max_slippage_pct: self.max_slippage_pct,
            emergency_loss_pct: self.emergency_loss_pct,
            min_venue_balance_krw: self.min_venue_balance_krw,
            max_exposure_pct: self.max_exposure_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn valid_config() -> AppConfig {
        AppConfig {
            upbit_access_key: "ak".into(),
            upbit_secret_key: "sk".into(),
            binance_api_key: "ak".into(),
            binance_secret_key: "sk".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.safety_margin_pct, dec!(1.5));
        assert_eq!(config.price_update_interval, Duration::from_secs(1));
        assert_eq!(config.transfer_timeout, Duration::from_secs(1800));
        assert!(config.monitor_coins.is_empty());
    }

    #[test]
    fn test_validate_requires_credentials_when_live() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_dry_run_skips_credential_check() {
        let config = AppConfig {
            dry_run: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_contradictory_trade_window_rejected() {
        let config = AppConfig {
            min_trade_amount_krw: dec!(5000000),
            max_trade_amount_krw: dec!(100000),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Contradictory(_))
        ));
    }

    #[test]
    fn test_risk_limits_mapping() {
        let config = valid_config();
        let limits = config.risk_limits();
        assert_eq!(limits.max_single_trade_krw, config.max_trade_amount_krw);
        assert_eq!(limits.max_concurrent_trades, 3);
    }
}
