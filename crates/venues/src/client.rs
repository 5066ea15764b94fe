//! The uniform venue capability contract.

use crate::VenueResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use kimp_core::{OrderBook, Venue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance of one asset on one venue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn new(free: Decimal, locked: Decimal) -> Self {
        Self { free, locked }
    }

    #[inline]
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// How a market buy is funded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuyFunds {
    /// Spend this much of the venue's quote currency.
    Quote(Decimal),
    /// Acquire this much of the base asset.
    Base(Decimal),
}

/// Result of an executed market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    /// Base quantity executed.
    pub executed_qty: Decimal,
    /// Quote amount paid (buy) or received (sell), before fee.
    pub executed_quote: Decimal,
    /// Fee charged, in the venue's quote currency.
    pub fee: Decimal,
    /// Venue order identifier.
    pub order_id: CompactString,
}

impl TradeFill {
    /// Effective average execution price.
    pub fn avg_price(&self) -> Decimal {
        if self.executed_qty.is_zero() {
            Decimal::ZERO
        } else {
            self.executed_quote / self.executed_qty
        }
    }
}

/// Deposit address on a venue, with the network it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub address: String,
    /// Secondary address (memo/tag) where the network requires one.
    pub tag: Option<String>,
    pub network: CompactString,
}

/// State of a deposit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositState {
    Pending,
    Confirmed,
    Failed,
}

/// One entry of a venue's deposit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEntry {
    pub asset: CompactString,
    pub amount: Decimal,
    pub state: DepositState,
    pub tx_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Uniform capability surface over one exchange.
///
/// Implementations are responsible for quantizing order quantities to the
/// venue's lot/tick grid before submission and for rejecting under-minimum
/// orders with [`crate::VenueError::BelowMinimum`].
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Which venue this client talks to.
    fn venue(&self) -> Venue;

    /// Last trade price of `symbol` in the venue's quote currency.
    async fn ticker(&self, symbol: &str) -> VenueResult<Decimal>;

    /// Order book snapshot, at most `depth` levels per side.
    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook>;

    /// Balance of one asset.
    async fn balance(&self, asset: &str) -> VenueResult<AssetBalance>;

    /// Market buy of `symbol`, funded per `funds`.
    async fn market_buy(&self, symbol: &str, funds: BuyFunds) -> VenueResult<TradeFill>;

    /// Market sell of `base_qty` of `symbol`.
    async fn market_sell(&self, symbol: &str, base_qty: Decimal) -> VenueResult<TradeFill>;

    /// Deposit address for `asset`, optionally on a specific network.
    async fn deposit_address(
        &self,
        asset: &str,
        network: Option<&str>,
    ) -> VenueResult<DepositAddress>;

    /// Withdraw `amount` of `asset` to `address`. Returns the withdrawal id.
    async fn withdraw(
        &self,
        asset: &str,
        address: &str,
        amount: Decimal,
        network: Option<&str>,
        tag: Option<&str>,
    ) -> VenueResult<CompactString>;

    /// Deposit history for `asset`, optionally bounded below by `since`.
    async fn deposit_history(
        &self,
        asset: &str,
        since: Option<DateTime<Utc>>,
    ) -> VenueResult<Vec<DepositEntry>>;

    /// Base symbols of markets quoting against this venue's quote currency.
    async fn list_markets(&self) -> VenueResult<Vec<CompactString>>;

    /// Authenticated liveness probe. Returns a human-readable status line.
    async fn verify_access(&self) -> VenueResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_total() {
        let bal = AssetBalance::new(dec!(3), dec!(1.5));
        assert_eq!(bal.total(), dec!(4.5));
    }

    #[test]
    fn test_fill_avg_price() {
        let fill = TradeFill {
            executed_qty: dec!(2),
            executed_quote: dec!(260000000),
            fee: dec!(130000),
            order_id: CompactString::new("ord-1"),
        };
        assert_eq!(fill.avg_price(), dec!(130000000));
    }

    #[test]
    fn test_fill_avg_price_zero_qty() {
        let fill = TradeFill {
            executed_qty: Decimal::ZERO,
            executed_quote: Decimal::ZERO,
            fee: Decimal::ZERO,
            order_id: CompactString::new("ord-2"),
        };
        assert_eq!(fill.avg_price(), Decimal::ZERO);
    }
}
