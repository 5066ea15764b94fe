//! Coin, network and withdraw-fee definitions.

use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-network withdraw fee entry, denominated in units of the coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFee {
    /// Network identifier (e.g., "BTC", "TRC20", "AVAX-C").
    pub network: CompactString,
    /// Fixed on-chain fee deducted from the withdrawn amount.
    pub fee: Decimal,
}

/// A coin tradable on both venues.
///
/// One symbol maps to exactly one withdraw fee per network; the preferred
/// network is the cheapest one both venues support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Uppercase ASCII symbol (e.g., "BTC").
    pub symbol: CompactString,
    /// Network used for cross-venue transfers of this coin.
    pub preferred_network: CompactString,
    /// Withdraw fees by network.
    pub withdraw_fees: Vec<NetworkFee>,
}

impl Coin {
    /// Build a coin from the built-in network and fee tables.
    pub fn from_symbol(symbol: &str) -> Self {
        let symbol = CompactString::new(symbol.to_ascii_uppercase());
        let preferred_network = CompactString::new(preferred_network(&symbol));
        let withdraw_fees = withdraw_fee_table(&symbol)
            .iter()
            .map(|(network, fee)| NetworkFee {
                network: CompactString::new(network),
                fee: *fee,
            })
            .collect();
        Self {
            symbol,
            preferred_network,
            withdraw_fees,
        }
    }

    /// Withdraw fee on the given network, if the coin supports it.
    pub fn withdraw_fee(&self, network: &str) -> Option<Decimal> {
        self.withdraw_fees
            .iter()
            .find(|entry| entry.network == network)
            .map(|entry| entry.fee)
    }

    /// Withdraw fee on the preferred network.
    pub fn preferred_withdraw_fee(&self) -> Decimal {
        self.withdraw_fee(&self.preferred_network)
            .unwrap_or(DEFAULT_WITHDRAW_FEE)
    }
}

/// Fallback withdraw fee for coins absent from the table (1 unit).
pub const DEFAULT_WITHDRAW_FEE: Decimal = Decimal::ONE;

/// Preferred transfer network per coin. USDT moves over TRC20 since both
/// venues support it and the fee is an order of magnitude below ERC20.
pub fn preferred_network(symbol: &str) -> &'static str {
    match symbol {
        "BTC" => "BTC",
        "ETH" => "ETH",
        "USDT" => "TRC20",
        "XRP" => "XRP",
        "ADA" => "ADA",
        "SOL" => "SOL",
        "DOT" => "DOT",
        "AVAX" => "AVAX-C",
        _ => "DEFAULT",
    }
}

/// Fixed withdraw fees per coin and network, in units of the coin.
fn withdraw_fee_table(symbol: &str) -> Vec<(&'static str, Decimal)> {
    match symbol {
        "BTC" => vec![("BTC", Decimal::from_parts(5, 0, 0, false, 4))],
        "ETH" => vec![("ETH", Decimal::from_parts(5, 0, 0, false, 3))],
        "USDT" => vec![
            ("TRC20", Decimal::ONE),
            ("ERC20", Decimal::from_parts(10, 0, 0, false, 0)),
        ],
        "XRP" => vec![("XRP", Decimal::from_parts(25, 0, 0, false, 2))],
        "ADA" => vec![("ADA", Decimal::ONE)],
        "SOL" => vec![("SOL", Decimal::from_parts(1, 0, 0, false, 2))],
        "DOT" => vec![("DOT", Decimal::from_parts(1, 0, 0, false, 1))],
        "AVAX" => vec![("AVAX-C", Decimal::from_parts(1, 0, 0, false, 2))],
        _ => vec![("DEFAULT", Decimal::ONE)],
    }
}
