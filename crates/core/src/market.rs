//! Market data structures: order sides and books.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Notional value of this level in the book's quote currency.
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Order book snapshot. Bids descending, asks ascending by price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn new(bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        Self { bids, asks }
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Summed notional of the best `levels` bid levels.
    pub fn bid_notional(&self, levels: usize) -> Decimal {
        self.bids
            .iter()
            .take(levels)
            .map(BookLevel::notional)
            .sum()
    }

    /// Summed notional of the best `levels` ask levels.
    pub fn ask_notional(&self, levels: usize) -> Decimal {
        self.asks
            .iter()
            .take(levels)
            .map(BookLevel::notional)
            .sum()
    }
}
