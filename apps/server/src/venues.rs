//! Public venue bindings.
//!
//! Thin REST clients over the venues' public market-data endpoints: ticker,
//! order book and market list need no authentication. The authenticated
//! surface (balances, orders, transfers) is not bound here; in paper mode
//! the [`kimp_venues::PaperVenue`] decorator intercepts exactly those calls
//! into the virtual ledger, which is how the bot runs end-to-end without
//! signing keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use kimp_core::{BookLevel, OrderBook, Venue};
use kimp_venues::{
    AssetBalance, BuyFunds, DepositAddress, DepositEntry, TradeFill, VenueClient, VenueError,
    VenueResult,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> VenueResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| VenueError::Transient(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> VenueError {
    if e.is_timeout() {
        VenueError::Timeout(e.to_string())
    } else {
        VenueError::Transient(e.to_string())
    }
}

fn private_unbound() -> VenueError {
    VenueError::Permanent("authenticated endpoint not bound on the public client".to_string())
}

/// Upbit public market data (KRW markets).
pub struct UpbitPublic {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    trade_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderbookUnit {
    bid_price: Decimal,
    bid_size: Decimal,
    ask_price: Decimal,
    ask_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderbook {
    orderbook_units: Vec<UpbitOrderbookUnit>,
}

#[derive(Debug, Deserialize)]
struct UpbitMarket {
    market: String,
}

impl UpbitPublic {
    pub fn new() -> VenueResult<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn market_code(symbol: &str) -> String {
        format!("KRW-{symbol}")
    }
}

#[async_trait]
impl VenueClient for UpbitPublic {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Decimal> {
        let url = format!(
            "https://api.upbit.com/v1/ticker?markets={}",
            Self::market_code(symbol)
        );
        let tickers: Vec<UpbitTicker> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        tickers
            .first()
            .map(|t| t.trade_price)
            .ok_or_else(|| VenueError::BadSymbol(symbol.to_string()))
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        let url = format!(
            "https://api.upbit.com/v1/orderbook?markets={}",
            Self::market_code(symbol)
        );
        let books: Vec<UpbitOrderbook> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        let book = books
            .into_iter()
            .next()
            .ok_or_else(|| VenueError::BadSymbol(symbol.to_string()))?;
        let bids = book
            .orderbook_units
            .iter()
            .take(depth)
            .map(|unit| BookLevel::new(unit.bid_price, unit.bid_size))
            .collect();
        let asks = book
            .orderbook_units
            .iter()
            .take(depth)
            .map(|unit| BookLevel::new(unit.ask_price, unit.ask_size))
            .collect();
        Ok(OrderBook::new(bids, asks))
    }

    async fn balance(&self, _asset: &str) -> VenueResult<AssetBalance> {
        Err(private_unbound())
    }

    async fn market_buy(&self, _symbol: &str, _funds: BuyFunds) -> VenueResult<TradeFill> {
        Err(private_unbound())
    }

    async fn market_sell(&self, _symbol: &str, _base_qty: Decimal) -> VenueResult<TradeFill> {
        Err(private_unbound())
    }

    async fn deposit_address(
        &self,
        _asset: &str,
        _network: Option<&str>,
    ) -> VenueResult<DepositAddress> {
        Err(private_unbound())
    }

    async fn withdraw(
        &self,
        _asset: &str,
        _address: &str,
        _amount: Decimal,
        _network: Option<&str>,
        _tag: Option<&str>,
    ) -> VenueResult<CompactString> {
        Err(private_unbound())
    }

    async fn deposit_history(
        &self,
        _asset: &str,
        _since: Option<DateTime<Utc>>,
    ) -> VenueResult<Vec<DepositEntry>> {
        Err(private_unbound())
    }

    async fn list_markets(&self) -> VenueResult<Vec<CompactString>> {
        let url = "https://api.upbit.com/v1/market/all";
        let markets: Vec<UpbitMarket> = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        Ok(markets
            .into_iter()
            .filter_map(|market| {
                market
                    .market
                    .strip_prefix("KRW-")
                    .map(CompactString::new)
            })
            .collect())
    }

    async fn verify_access(&self) -> VenueResult<String> {
        // Public binding: reachability only.
        self.ticker("BTC").await?;
        Ok("Upbit public endpoints reachable".to_string())
    }
}

/// Binance public market data (USDT markets).
pub struct BinancePublic {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct BinanceDepth {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceSymbolInfo {
    base_asset: String,
    quote_asset: String,
    status: String,
}

impl BinancePublic {
    pub fn new(_testnet: bool) -> VenueResult<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn market_code(symbol: &str) -> String {
        format!("{symbol}USDT")
    }
}

#[async_trait]
impl VenueClient for BinancePublic {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn ticker(&self, symbol: &str) -> VenueResult<Decimal> {
        let url = format!(
            "https://api.binance.com/api/v3/ticker/price?symbol={}",
            Self::market_code(symbol)
        );
        let ticker: BinanceTicker = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|_| VenueError::BadSymbol(symbol.to_string()))?;
        Ok(ticker.price)
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> VenueResult<OrderBook> {
        let url = format!(
            "https://api.binance.com/api/v3/depth?symbol={}&limit={}",
            Self::market_code(symbol),
            depth.max(5)
        );
        let book: BinanceDepth = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|_| VenueError::BadSymbol(symbol.to_string()))?;
        Ok(OrderBook::new(
            book.bids
                .into_iter()
                .take(depth)
                .map(|(price, qty)| BookLevel::new(price, qty))
                .collect(),
            book.asks
                .into_iter()
                .take(depth)
                .map(|(price, qty)| BookLevel::new(price, qty))
                .collect(),
        ))
    }

    async fn balance(&self, _asset: &str) -> VenueResult<AssetBalance> {
        Err(private_unbound())
    }

    async fn market_buy(&self, _symbol: &str, _funds: BuyFunds) -> VenueResult<TradeFill> {
        Err(private_unbound())
    }

    async fn market_sell(&self, _symbol: &str, _base_qty: Decimal) -> VenueResult<TradeFill> {
        Err(private_unbound())
    }

    async fn deposit_address(
        &self,
        _asset: &str,
        _network: Option<&str>,
    ) -> VenueResult<DepositAddress> {
        Err(private_unbound())
    }

    async fn withdraw(
        &self,
        _asset: &str,
        _address: &str,
        _amount: Decimal,
        _network: Option<&str>,
        _tag: Option<&str>,
    ) -> VenueResult<CompactString> {
        Err(private_unbound())
    }

    async fn deposit_history(
        &self,
        _asset: &str,
        _since: Option<DateTime<Utc>>,
    ) -> VenueResult<Vec<DepositEntry>> {
        Err(private_unbound())
    }

    async fn list_markets(&self) -> VenueResult<Vec<CompactString>> {
        let url = "https://api.binance.com/api/v3/exchangeInfo";
        let info: BinanceExchangeInfo = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|symbol| symbol.quote_asset == "USDT" && symbol.status == "TRADING")
            .map(|symbol| CompactString::new(symbol.base_asset))
            .collect())
    }

    async fn verify_access(&self) -> VenueResult<String> {
        self.ticker("BTC").await?;
        Ok("Binance public endpoints reachable".to_string())
    }
}
