//! Error types for venue operations.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to a venue.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transient venue failure: {0}")]
    Transient(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unknown symbol: {0}")]
    BadSymbol(String),

    #[error("Order below venue minimum: {amount} < {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("Partial fill: executed {executed} of {requested}")]
    PartialFill { executed: Decimal, requested: Decimal },

    #[error("Venue rejected request: {0}")]
    Permanent(String),
}

impl VenueError {
    /// True if the operation is likely to succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VenueError::Transient(_) | VenueError::RateLimited | VenueError::Timeout(_)
        )
    }

    /// True if the error requires manual intervention and must not be retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Suggested delay before retrying, None for permanent errors.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            VenueError::RateLimited => Some(Duration::from_secs(60)),
            VenueError::Transient(_) => Some(Duration::from_secs(2)),
            VenueError::Timeout(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

/// Result type for venue operations.
pub type VenueResult<T> = Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transient_classification() {
        assert!(VenueError::RateLimited.is_transient());
        assert!(VenueError::Timeout("tick".into()).is_transient());
        assert!(VenueError::Auth("bad key".into()).is_permanent());
        assert!(VenueError::BelowMinimum {
            amount: dec!(1),
            minimum: dec!(5000)
        }
        .is_permanent());
    }

    #[test]
    fn test_retry_delay_only_for_transient() {
        assert!(VenueError::RateLimited.suggested_retry_delay().is_some());
        assert!(VenueError::BadSymbol("FOO".into())
            .suggested_retry_delay()
            .is_none());
    }
}
