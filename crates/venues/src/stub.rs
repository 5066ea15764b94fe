//! Scriptable in-memory venue for tests.
//!
//! Holds prices, books and balances behind a mutex; tests script deposits,
//! failures and market data, then drive the same [`VenueClient`] surface the
//! real shims expose.

use crate::{
    AssetBalance, BuyFunds, DepositAddress, DepositEntry, DepositState, TradeFill, VenueClient,
    VenueError, VenueResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use kimp_core::{OrderBook, Venue};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

/// A withdrawal accepted by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct StubWithdrawal {
    pub id: CompactString,
    pub asset: CompactString,
    pub amount: Decimal,
    pub address: String,
    pub network: Option<String>,
}

/// Deposit credited after a scripted number of balance polls.
#[derive(Debug, Clone)]
struct PendingDeposit {
    asset: CompactString,
    amount: Decimal,
    remaining_polls: u32,
}

#[derive(Debug, Default)]
struct StubState {
    prices: HashMap<CompactString, Decimal>,
    books: HashMap<CompactString, OrderBook>,
    balances: HashMap<CompactString, AssetBalance>,
    markets: Vec<CompactString>,
    deposits: Vec<DepositEntry>,
    pending_deposits: Vec<PendingDeposit>,
    withdrawals: Vec<StubWithdrawal>,
    deposit_networks: HashMap<CompactString, CompactString>,
    book_failures_remaining: u32,
    fail_withdraw: bool,
    fail_access: bool,
    next_order_id: u64,
}

/// Scriptable venue test double.
pub struct StubVenue {
    venue: Venue,
    fee_pct: Decimal,
    state: Mutex<StubState>,
}

impl StubVenue {
    /// Stub with the venue's standard taker fee (Upbit 0.05%, Binance 0.1%).
    pub fn new(venue: Venue) -> Self {
        let fee_pct = match venue {
            Venue::Upbit => Decimal::from_parts(5, 0, 0, false, 2),
            Venue::Binance => Decimal::from_parts(1, 0, 0, false, 1),
        };
        Self {
            venue,
            fee_pct,
            state: Mutex::new(StubState {
                next_order_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock().unwrap();
        state.prices.insert(CompactString::new(symbol), price);
    }

    pub fn set_book(&self, symbol: &str, book: OrderBook) {
        let mut state = self.state.lock().unwrap();
        state.books.insert(CompactString::new(symbol), book);
    }

    pub fn set_balance(&self, asset: &str, free: Decimal) {
        let mut state = self.state.lock().unwrap();
        state
            .balances
            .insert(CompactString::new(asset), AssetBalance::new(free, Decimal::ZERO));
    }

    pub fn set_markets(&self, symbols: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.markets = symbols.iter().map(|s| CompactString::new(s)).collect();
    }

    /// Force the deposit-address network reported for `asset`.
    pub fn set_deposit_network(&self, asset: &str, network: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .deposit_networks
            .insert(CompactString::new(asset), CompactString::new(network));
    }

    /// Credit `amount` of `asset` after `after_polls` balance queries.
    pub fn schedule_deposit(&self, asset: &str, amount: Decimal, after_polls: u32) {
        let mut state = self.state.lock().unwrap();
        state.pending_deposits.push(PendingDeposit {
            asset: CompactString::new(asset),
            amount,
            remaining_polls: after_polls,
        });
    }

    /// Append a scripted deposit-history entry.
    pub fn push_deposit_entry(&self, entry: DepositEntry) {
        let mut state = self.state.lock().unwrap();
        state.deposits.push(entry);
    }

    /// Make the next `n` order-book queries fail with a transient error.
    pub fn fail_order_books(&self, n: u32) {
        self.state.lock().unwrap().book_failures_remaining = n;
    }

    pub fn fail_withdrawals(&self, fail: bool) {
        self.state.lock().unwrap().fail_withdraw = fail;
    }

    pub fn fail_access(&self, fail: bool) {
        self.state.lock().unwrap().fail_access = fail;
    }

    /// Withdrawals the stub has accepted so far.
    pub fn withdrawals(&self) -> Vec<StubWithdrawal> {
        self.state.lock().unwrap().withdrawals.clone()
    }

    pub fn free_balance(&self, asset: &str) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    fn price_of(state: &StubState, symbol: &str) -> VenueResult<Decimal> {
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::BadSymbol(symbol.to_string()))
    }

    fn credit(state: &mut StubState, asset: &str, amount: Decimal) {
        let entry = state
            .balances
            .entry(CompactString::new(asset))
            .or_default();
        entry.free += amount;
    }

    fn debit(state: &mut StubState, asset: &str, amount: Decimal) -> VenueResult<()> {
        let entry = state
            .balances
            .entry(CompactString::new(asset))
            .or_default();
        if entry.free < amount {
            return Err(VenueError::InsufficientBalance {
                needed: amount,
                available: entry.free,
            });
        }
        entry.free -= amount;
        Ok(())
    }

    fn tick_pending_deposits(state: &mut StubState, asset: &str) {
        let mut credited = Vec::new();
        state.pending_deposits.retain_mut(|pending| {
            if pending.asset != asset {
                return true;
            }
            if pending.remaining_polls == 0 {
                credited.push((pending.asset.clone(), pending.amount));
                false
            } else {
                pending.remaining_polls -= 1;
                true
            }
        });
        for (asset, amount) in credited {
            Self::credit(state, &asset, amount);
            state.deposits.push(DepositEntry {
                asset,
                amount,
                state: DepositState::Confirmed,
                tx_id: Some("stub-tx".to_string()),
                completed_at: Some(Utc::now()),
            });
        }
    }

    fn next_order_id(state: &mut StubState) -> CompactString {
        let id = state.next_order_id;
        state.next_order_id += 1;
        CompactString::new(format!("stub-{id}"))
    }
}

#[async_trait]
impl VenueClient for StubVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Decimal> {
        let state = self.state.lock().unwrap();
        Self::price_of(&state, symbol)
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        let mut state = self.state.lock().unwrap();
        if state.book_failures_remaining > 0 {
            state.book_failures_remaining -= 1;
            return Err(VenueError::Transient("scripted book failure".into()));
        }
        let book = state
            .books
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::BadSymbol(symbol.to_string()))?;
        Ok(OrderBook::new(
            book.bids.into_iter().take(depth).collect(),
            book.asks.into_iter().take(depth).collect(),
        ))
    }

    async fn balance(&self, asset: &str) -> VenueResult<AssetBalance> {
        let mut state = self.state.lock().unwrap();
        Self::tick_pending_deposits(&mut state, asset);
        Ok(state.balances.get(asset).copied().unwrap_or_default())
    }

    async fn market_buy(&self, symbol: &str, funds: BuyFunds) -> VenueResult<TradeFill> {
        let mut state = self.state.lock().unwrap();
        let price = Self::price_of(&state, symbol)?;
        let quote_asset = self.venue.quote_currency();
        let (spend, fee, qty) = match funds {
            BuyFunds::Quote(amount) => {
                let fee = amount * self.fee_pct / Decimal::ONE_HUNDRED;
                (amount, fee, (amount - fee) / price)
            }
            BuyFunds::Base(qty) => {
                let cost = qty * price;
                let fee = cost * self.fee_pct / Decimal::ONE_HUNDRED;
                (cost + fee, fee, qty)
            }
        };
        Self::debit(&mut state, quote_asset, spend)?;
        Self::credit(&mut state, symbol, qty);
        Ok(TradeFill {
            executed_qty: qty,
            executed_quote: spend - fee,
            fee,
            order_id: Self::next_order_id(&mut state),
        })
    }

    async fn market_sell(&self, symbol: &str, base_qty: Decimal) -> VenueResult<TradeFill> {
        let mut state = self.state.lock().unwrap();
        let price = Self::price_of(&state, symbol)?;
        Self::debit(&mut state, symbol, base_qty)?;
        let proceeds = base_qty * price;
        let fee = proceeds * self.fee_pct / Decimal::ONE_HUNDRED;
        let quote_asset = self.venue.quote_currency();
        Self::credit(&mut state, quote_asset, proceeds - fee);
        Ok(TradeFill {
            executed_qty: base_qty,
            executed_quote: proceeds,
            fee,
            order_id: Self::next_order_id(&mut state),
        })
    }

    async fn deposit_address(
        &self,
        asset: &str,
        network: Option<&str>,
    ) -> VenueResult<DepositAddress> {
        let state = self.state.lock().unwrap();
        let network = state
            .deposit_networks
            .get(asset)
            .cloned()
            .or_else(|| network.map(CompactString::new))
            .unwrap_or_else(|| CompactString::new(kimp_core::preferred_network(asset)));
        Ok(DepositAddress {
            address: format!("{}-{}-addr", self.venue.as_str().to_lowercase(), asset),
            tag: None,
            network,
        })
    }

    async fn withdraw(
        &self,
        asset: &str,
        address: &str,
        amount: Decimal,
        network: Option<&str>,
        _tag: Option<&str>,
    ) -> VenueResult<CompactString> {
        let mut state = self.state.lock().unwrap();
        if state.fail_withdraw {
            return Err(VenueError::Permanent("withdrawals disabled".into()));
        }
        Self::debit(&mut state, asset, amount)?;
        let id = CompactString::new(format!("wd-{}", state.withdrawals.len() + 1));
        state.withdrawals.push(StubWithdrawal {
            id: id.clone(),
            asset: CompactString::new(asset),
            amount,
            address: address.to_string(),
            network: network.map(str::to_string),
        });
        Ok(id)
    }

    async fn deposit_history(
        &self,
        asset: &str,
        since: Option<DateTime<Utc>>,
    ) -> VenueResult<Vec<DepositEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deposits
            .iter()
            .filter(|entry| entry.asset == asset)
            .filter(|entry| match (since, entry.completed_at) {
                (Some(bound), Some(at)) => at >= bound,
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn list_markets(&self) -> VenueResult<Vec<CompactString>> {
        Ok(self.state.lock().unwrap().markets.clone())
    }

    async fn verify_access(&self) -> VenueResult<String> {
        if self.state.lock().unwrap().fail_access {
            return Err(VenueError::Auth("scripted auth failure".into()));
        }
        Ok(format!("{} stub ready", self.venue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_market_buy_and_sell_round_trip_balances() {
        let venue = StubVenue::new(Venue::Upbit);
        venue.set_price("BTC", dec!(130000000));
        venue.set_balance("KRW", dec!(1000000));

        let fill = venue
            .market_buy("BTC", BuyFunds::Quote(dec!(1000000)))
            .await
            .unwrap();
        assert!(fill.executed_qty > Decimal::ZERO);
        assert_eq!(venue.free_balance("KRW"), Decimal::ZERO);
        assert_eq!(venue.free_balance("BTC"), fill.executed_qty);

        let sell = venue.market_sell("BTC", fill.executed_qty).await.unwrap();
        assert_eq!(venue.free_balance("BTC"), Decimal::ZERO);
        assert!(sell.executed_quote - sell.fee > dec!(990000));
    }

    #[tokio::test]
    async fn test_withdraw_debits_and_records() {
        let venue = StubVenue::new(Venue::Binance);
        venue.set_balance("USDT", dec!(500));
        let id = venue
            .withdraw("USDT", "upbit-usdt-addr", dec!(499), Some("TRC20"), None)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "wd-1");
        assert_eq!(venue.free_balance("USDT"), dec!(1));
        assert_eq!(venue.withdrawals().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_deposit_credits_after_polls() {
        let venue = StubVenue::new(Venue::Binance);
        venue.schedule_deposit("BTC", dec!(0.5), 2);

        assert_eq!(venue.balance("BTC").await.unwrap().total(), Decimal::ZERO);
        assert_eq!(venue.balance("BTC").await.unwrap().total(), Decimal::ZERO);
        // Third poll sees the credit.
        assert_eq!(venue.balance("BTC").await.unwrap().total(), dec!(0.5));

        let history = venue.deposit_history("BTC", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, DepositState::Confirmed);
    }

    #[tokio::test]
    async fn test_scripted_book_failures() {
        let venue = StubVenue::new(Venue::Upbit);
        venue.set_book("BTC", OrderBook::default());
        venue.fail_order_books(1);
        assert!(venue.order_book("BTC", 5).await.is_err());
        assert!(venue.order_book("BTC", 5).await.is_ok());
    }

    #[tokio::test]
    async fn test_insufficient_balance_on_buy() {
        let venue = StubVenue::new(Venue::Upbit);
        venue.set_price("BTC", dec!(130000000));
        let result = venue.market_buy("BTC", BuyFunds::Quote(dec!(1000))).await;
        assert!(matches!(
            result,
            Err(VenueError::InsufficientBalance { .. })
        ));
    }
}
