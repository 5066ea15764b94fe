//! Error types for the premium engine.

use kimp_venues::VenueError;
use thiserror::Error;

/// Errors that can occur while computing premiums or opportunities.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No USD/KRW rate from any source and no usable cache. Every KRW↔USDT
    /// conversion path must halt on this.
    #[error("Exchange rate unavailable")]
    FiatUnavailable,

    #[error(transparent)]
    Venue(#[from] VenueError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<crate::RateError> for EngineError {
    fn from(_: crate::RateError) -> Self {
        EngineError::FiatUnavailable
    }
}
