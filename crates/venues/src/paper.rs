//! Paper-trading venue decorator.
//!
//! Wraps a real client and routes market data (ticker, order book, market
//! list) straight through while intercepting balance, order, withdraw and
//! deposit-history calls into a shared virtual ledger. Market orders walk
//! the real order book so the simulated execution price carries real
//! slippage. The ledger is persisted as a single JSON document rewritten
//! atomically on every mutation.

use crate::{
    AssetBalance, BuyFunds, DepositAddress, DepositEntry, DepositState, TradeFill, VenueClient,
    VenueError, VenueResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use kimp_core::{Coin, OrderBook, Venue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Fill tolerance: an executed quantity below this fraction of the request
/// surfaces as a partial fill.
const FILL_TOLERANCE: Decimal = Decimal::from_parts(995, 0, 0, false, 3);

/// A simulated order execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTrade {
    pub trade_id: CompactString,
    pub venue: Venue,
    pub symbol: CompactString,
    pub side: CompactString,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A simulated cross-venue transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTransfer {
    pub transfer_id: CompactString,
    pub asset: CompactString,
    /// Amount debited from the source venue.
    pub amount: Decimal,
    /// On-chain fee deducted before the destination credit.
    pub fee: Decimal,
    pub from: Venue,
    pub to: Venue,
    pub completed: bool,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    balances: HashMap<Venue, HashMap<CompactString, AssetBalance>>,
    trades: Vec<SimTrade>,
    transfers: Vec<SimTransfer>,
    trade_counter: u64,
    transfer_counter: u64,
}

/// Virtual balances and simulation logs shared by both paper venues.
pub struct PaperLedger {
    state: Mutex<LedgerState>,
    state_path: Option<PathBuf>,
}

impl PaperLedger {
    /// Fresh ledger seeded with initial balances. If `state_path` exists on
    /// disk its contents win over the seed.
    pub fn new(
        initial: &[(Venue, &str, Decimal)],
        state_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let mut state = LedgerState::default();
        for (venue, asset, amount) in initial {
            state
                .balances
                .entry(*venue)
                .or_default()
                .insert(
                    CompactString::new(asset),
                    AssetBalance::new(*amount, Decimal::ZERO),
                );
        }
        if let Some(path) = &state_path {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<LedgerState>(&raw) {
                    Ok(loaded) => {
                        info!("Loaded paper state from {}", path.display());
                        state = loaded;
                    }
                    Err(e) => warn!("Ignoring unreadable paper state: {}", e),
                },
                Err(_) => {}
            }
        }
        Arc::new(Self {
            state: Mutex::new(state),
            state_path,
        })
    }

    pub fn balance(&self, venue: Venue, asset: &str) -> AssetBalance {
        let state = self.state.lock().unwrap();
        state
            .balances
            .get(&venue)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or_default()
    }

    /// All non-zero balances on one venue.
    pub fn balances_of(&self, venue: Venue) -> Vec<(CompactString, AssetBalance)> {
        let state = self.state.lock().unwrap();
        state
            .balances
            .get(&venue)
            .map(|assets| {
                assets
                    .iter()
                    .filter(|(_, bal)| !bal.total().is_zero())
                    .map(|(asset, bal)| (asset.clone(), *bal))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn trades(&self) -> Vec<SimTrade> {
        self.state.lock().unwrap().trades.clone()
    }

    pub fn transfers(&self) -> Vec<SimTransfer> {
        self.state.lock().unwrap().transfers.clone()
    }

    /// Record an execution against the ledger and persist.
    fn execute_trade(
        &self,
        venue: Venue,
        symbol: &str,
        buy: bool,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
    ) -> VenueResult<SimTrade> {
        let mut state = self.state.lock().unwrap();
        let quote_asset = venue.quote_currency();
        let total = price * quantity;
        if buy {
            Self::debit(&mut state, venue, quote_asset, total + fee)?;
            Self::credit(&mut state, venue, symbol, quantity);
        } else {
            Self::debit(&mut state, venue, symbol, quantity)?;
            Self::credit(&mut state, venue, quote_asset, total - fee);
        }
        state.trade_counter += 1;
        let trade = SimTrade {
            trade_id: CompactString::new(format!("SIM_{}_{}", venue, state.trade_counter)),
            venue,
            symbol: CompactString::new(symbol),
            side: CompactString::new(if buy { "buy" } else { "sell" }),
            price,
            quantity,
            fee,
            timestamp: Utc::now(),
        };
        state.trades.push(trade.clone());
        self.persist(&state);
        Ok(trade)
    }

    /// Debit the source side of a transfer and log it as pending.
    fn begin_transfer(
        &self,
        asset: &str,
        amount: Decimal,
        fee: Decimal,
        from: Venue,
    ) -> VenueResult<CompactString> {
        let mut state = self.state.lock().unwrap();
        Self::debit(&mut state, from, asset, amount)?;
        state.transfer_counter += 1;
        let id = CompactString::new(format!("SIM_TRANSFER_{}", state.transfer_counter));
        state.transfers.push(SimTransfer {
            transfer_id: id.clone(),
            asset: CompactString::new(asset),
            amount,
            fee,
            from,
            to: from.counterpart(),
            completed: false,
            initiated_at: Utc::now(),
            completed_at: None,
        });
        self.persist(&state);
        Ok(id)
    }

    /// Credit the destination side of a pending transfer, net of fee.
    fn complete_transfer(&self, transfer_id: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state
            .transfers
            .iter()
            .position(|t| t.transfer_id == transfer_id && !t.completed)
        else {
            return;
        };
        let (to, asset, credit) = {
            let transfer = &mut state.transfers[idx];
            transfer.completed = true;
            transfer.completed_at = Some(Utc::now());
            (
                transfer.to,
                transfer.asset.clone(),
                (transfer.amount - transfer.fee).max(Decimal::ZERO),
            )
        };
        Self::credit(&mut state, to, &asset, credit);
        info!(
            "Paper transfer {} arrived: {} {} on {}",
            transfer_id, credit, asset, to
        );
        self.persist(&state);
    }

    fn deposit_history(&self, venue: Venue, asset: &str) -> Vec<DepositEntry> {
        let state = self.state.lock().unwrap();
        state
            .transfers
            .iter()
            .filter(|t| t.to == venue && t.asset == asset)
            .map(|t| DepositEntry {
                asset: t.asset.clone(),
                amount: (t.amount - t.fee).max(Decimal::ZERO),
                state: if t.completed {
                    DepositState::Confirmed
                } else {
                    DepositState::Pending
                },
                tx_id: Some(t.transfer_id.to_string()),
                completed_at: t.completed_at,
            })
            .collect()
    }

    fn credit(state: &mut LedgerState, venue: Venue, asset: &str, amount: Decimal) {
        let balance = state
            .balances
            .entry(venue)
            .or_default()
            .entry(CompactString::new(asset))
            .or_default();
        balance.free += amount;
    }

    fn debit(
        state: &mut LedgerState,
        venue: Venue,
        asset: &str,
        amount: Decimal,
    ) -> VenueResult<()> {
        let balance = state
            .balances
            .entry(venue)
            .or_default()
            .entry(CompactString::new(asset))
            .or_default();
        if balance.free < amount {
            return Err(VenueError::InsufficientBalance {
                needed: amount,
                available: balance.free,
            });
        }
        balance.free -= amount;
        Ok(())
    }

    /// Write the state document via temp-file rename so readers never see a
    /// partial write.
    fn persist(&self, state: &LedgerState) {
        let Some(path) = &self.state_path else {
            return;
        };
        let serialized = match serde_json::to_string_pretty(state) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize paper state: {}", e);
                return;
            }
        };
        let tmp = path.with_extension("json.tmp");
        if let Err(e) =
            std::fs::write(&tmp, serialized).and_then(|_| std::fs::rename(&tmp, path))
        {
            warn!("Failed to persist paper state: {}", e);
        }
    }
}

/// Paper-trading decorator over a real venue client.
pub struct PaperVenue {
    inner: Arc<dyn VenueClient>,
    ledger: Arc<PaperLedger>,
    /// Venue taker fee in percent.
    fee_pct: Decimal,
    /// Simulated on-chain transfer latency.
    transfer_delay: Duration,
}

impl PaperVenue {
    pub fn new(inner: Arc<dyn VenueClient>, ledger: Arc<PaperLedger>) -> Self {
        let fee_pct = match inner.venue() {
            Venue::Upbit => Decimal::from_parts(5, 0, 0, false, 2),
            Venue::Binance => Decimal::from_parts(1, 0, 0, false, 1),
        };
        Self {
            inner,
            ledger,
            fee_pct,
            transfer_delay: Duration::from_secs(60),
        }
    }

    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = delay;
        self
    }

    pub fn ledger(&self) -> Arc<PaperLedger> {
        Arc::clone(&self.ledger)
    }

    /// Walk ask levels until `quote_budget` is spent. Returns (qty, spent).
    fn fill_asks_by_quote(book: &OrderBook, quote_budget: Decimal) -> (Decimal, Decimal) {
        let mut remaining = quote_budget;
        let mut qty = Decimal::ZERO;
        let mut spent = Decimal::ZERO;
        for level in &book.asks {
            if remaining <= Decimal::ZERO {
                break;
            }
            let level_notional = level.notional();
            if level_notional <= remaining {
                qty += level.quantity;
                spent += level_notional;
                remaining -= level_notional;
            } else {
                let take = remaining / level.price;
                qty += take;
                spent += remaining;
                remaining = Decimal::ZERO;
            }
        }
        (qty, spent)
    }

    /// Walk levels until `target_qty` is filled. Returns (qty, notional).
    fn fill_by_quantity(levels: &[kimp_core::BookLevel], target_qty: Decimal) -> (Decimal, Decimal) {
        let mut remaining = target_qty;
        let mut qty = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = level.quantity.min(remaining);
            qty += take;
            notional += take * level.price;
            remaining -= take;
        }
        (qty, notional)
    }

    async fn execution_book(&self, symbol: &str) -> VenueResult<OrderBook> {
        self.inner.order_book(symbol, 10).await
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn venue(&self) -> Venue {
        self.inner.venue()
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Decimal> {
        self.inner.ticker(symbol).await
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        self.inner.order_book(symbol, depth).await
    }

    async fn balance(&self, asset: &str) -> VenueResult<AssetBalance> {
        Ok(self.ledger.balance(self.venue(), asset))
    }

    async fn market_buy(&self, symbol: &str, funds: BuyFunds) -> VenueResult<TradeFill> {
        let book = self.execution_book(symbol).await?;
        let (qty, notional, requested_qty) = match funds {
            BuyFunds::Quote(amount) => {
                let fee_budget = amount * self.fee_pct / Decimal::ONE_HUNDRED;
                let (qty, spent) = Self::fill_asks_by_quote(&book, amount - fee_budget);
                (qty, spent, Decimal::ZERO)
            }
            BuyFunds::Base(target) => {
                let (qty, spent) = Self::fill_by_quantity(&book.asks, target);
                (qty, spent, target)
            }
        };
        if qty.is_zero() {
            return Err(VenueError::Permanent(format!("no asks for {symbol}")));
        }
        if !requested_qty.is_zero() && qty < requested_qty * FILL_TOLERANCE {
            return Err(VenueError::PartialFill {
                executed: qty,
                requested: requested_qty,
            });
        }
        let price = notional / qty;
        let fee = notional * self.fee_pct / Decimal::ONE_HUNDRED;
        let trade = self
            .ledger
            .execute_trade(self.venue(), symbol, true, price, qty, fee)?;
        Ok(TradeFill {
            executed_qty: qty,
            executed_quote: notional,
            fee,
            order_id: trade.trade_id,
        })
    }

    async fn market_sell(&self, symbol: &str, base_qty: Decimal) -> VenueResult<TradeFill> {
        let book = self.execution_book(symbol).await?;
        let (qty, notional) = Self::fill_by_quantity(&book.bids, base_qty);
        if qty.is_zero() {
            return Err(VenueError::Permanent(format!("no bids for {symbol}")));
        }
        if qty < base_qty * FILL_TOLERANCE {
            return Err(VenueError::PartialFill {
                executed: qty,
                requested: base_qty,
            });
        }
        let price = notional / qty;
        let fee = notional * self.fee_pct / Decimal::ONE_HUNDRED;
        let trade = self
            .ledger
            .execute_trade(self.venue(), symbol, false, price, qty, fee)?;
        Ok(TradeFill {
            executed_qty: qty,
            executed_quote: notional,
            fee,
            order_id: trade.trade_id,
        })
    }

    async fn deposit_address(
        &self,
        asset: &str,
        network: Option<&str>,
    ) -> VenueResult<DepositAddress> {
        let network = network
            .map(CompactString::new)
            .unwrap_or_else(|| CompactString::new(kimp_core::preferred_network(asset)));
        Ok(DepositAddress {
            address: format!("paper-{}-{}", self.venue().as_str().to_lowercase(), asset),
            tag: None,
            network,
        })
    }

    async fn withdraw(
        &self,
        asset: &str,
        _address: &str,
        amount: Decimal,
        network: Option<&str>,
        _tag: Option<&str>,
    ) -> VenueResult<CompactString> {
        let coin = Coin::from_symbol(asset);
        let fee = network
            .and_then(|n| coin.withdraw_fee(n))
            .unwrap_or_else(|| coin.preferred_withdraw_fee());
        let id = self.ledger.begin_transfer(asset, amount, fee, self.venue())?;
        let ledger = Arc::clone(&self.ledger);
        let transfer_id = id.clone();
        let delay = self.transfer_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ledger.complete_transfer(&transfer_id);
        });
        Ok(id)
    }

    async fn deposit_history(
        &self,
        asset: &str,
        since: Option<DateTime<Utc>>,
    ) -> VenueResult<Vec<DepositEntry>> {
        Ok(self
            .ledger
            .deposit_history(self.venue(), asset)
            .into_iter()
            .filter(|entry| match (since, entry.completed_at) {
                (Some(bound), Some(at)) => at >= bound,
                _ => true,
            })
            .collect())
    }

    async fn list_markets(&self) -> VenueResult<Vec<CompactString>> {
        self.inner.list_markets().await
    }

    async fn verify_access(&self) -> VenueResult<String> {
        Ok(format!("{} paper mode", self.venue()))
    }
}
