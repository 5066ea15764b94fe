//! Venue identifiers.

use serde::{Deserialize, Serialize};

/// Exchange venue identifier.
///
/// Upbit quotes against KRW, Binance against USDT. Every arbitrage cycle
/// crosses both venues exactly once in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Upbit,
    Binance,
}

impl Venue {
    /// Venue display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Venue::Upbit => "Upbit",
            Venue::Binance => "Binance",
        }
    }

    /// The currency this venue quotes markets in.
    pub fn quote_currency(self) -> &'static str {
        match self {
            Venue::Upbit => "KRW",
            Venue::Binance => "USDT",
        }
    }

    /// The other leg of the arbitrage pair.
    pub fn counterpart(self) -> Venue {
        match self {
            Venue::Upbit => Venue::Binance,
            Venue::Binance => Venue::Upbit,
        }
    }

    /// True for the KRW-denominated venue.
    #[inline]
    pub fn is_krw(self) -> bool {
        matches!(self, Venue::Upbit)
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
