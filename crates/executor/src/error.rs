//! Error types for strategy execution.

use kimp_venues::VenueError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures that terminate a trade step.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Deposit timeout: {asset} not received on {venue}")]
    TransferTimeout { venue: String, asset: String },

    #[error("Slippage exceeded: {slippage_pct}% over expected on {side}")]
    SlippageExceeded { side: String, slippage_pct: Decimal },

    #[error("Deposit network mismatch: wanted {wanted}, venue offers {offered}")]
    NetworkMismatch { wanted: String, offered: String },

    #[error("Exchange rate unavailable")]
    FiatUnavailable,

    #[error("Pre-flight failed: {0}")]
    Preflight(String),

    #[error("Trade cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Venue(#[from] VenueError),
}

impl From<kimp_engine::RateError> for StrategyError {
    fn from(_: kimp_engine::RateError) -> Self {
        StrategyError::FiatUnavailable
    }
}

/// Result type for strategy steps.
pub type StrategyResult<T> = Result<T, StrategyError>;
