//! Depth-bounded trade sizing.
//!
//! The trade size is the minimum summed notional of the best levels across
//! both sides of both venue books, scaled by a depth-utilization factor and
//! clamped to the configured [min, max] window. Thin books shrink the size,
//! which bounds slippage implicitly.

use kimp_core::OrderBook;
use rust_decimal::Decimal;

/// Book levels considered per side.
pub const DEPTH_LEVELS: usize = 5;

/// Fraction of the available liquidity one trade may consume, percent.
pub const DEPTH_UTILIZATION_PCT: Decimal = Decimal::from_parts(30, 0, 0, false, 0);

/// Size a trade in KRW from both venue books.
///
/// `binance_book` notionals are in USDT and converted via `fiat_rate`.
/// Returns `None` when either book is empty on either side.
pub fn size_trade_krw(
    upbit_book: &OrderBook,
    binance_book: &OrderBook,
    fiat_rate: Decimal,
    min_krw: Decimal,
    max_krw: Decimal,
) -> Option<Decimal> {
    let upbit_bid = upbit_book.bid_notional(DEPTH_LEVELS);
    let upbit_ask = upbit_book.ask_notional(DEPTH_LEVELS);
    let binance_bid = binance_book.bid_notional(DEPTH_LEVELS) * fiat_rate;
    let binance_ask = binance_book.ask_notional(DEPTH_LEVELS) * fiat_rate;

    let thinnest = [upbit_bid, upbit_ask, binance_bid, binance_ask]
        .into_iter()
        .min()?;
    if thinnest.is_zero() {
        return None;
    }

    let usable = thinnest * DEPTH_UTILIZATION_PCT / Decimal::ONE_HUNDRED;
    Some(usable.clamp(min_krw, max_krw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kimp_core::BookLevel;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn book(price: Decimal, qty: Decimal) -> OrderBook {
        OrderBook::new(
            vec![BookLevel::new(price, qty)],
            vec![BookLevel::new(price, qty)],
        )
    }

    #[test]
    fn test_size_uses_thinnest_side() {
        // Upbit holds 10M KRW per side; Binance holds 2,000 USDT = 2.6M KRW.
        let upbit = book(dec!(130000000), dec!(0.0770));
        let binance = book(dec!(100000), dec!(0.02));
        let sized = size_trade_krw(&upbit, &binance, dec!(1300), dec!(100000), dec!(5000000))
            .unwrap();
        // 30% of 2.6M.
        assert_eq!(sized, dec!(780000));
    }

    #[test]
    fn test_size_clamped_to_window() {
        let upbit = book(dec!(130000000), dec!(10));
        let binance = book(dec!(100000), dec!(10));
        let sized = size_trade_krw(&upbit, &binance, dec!(1300), dec!(100000), dec!(5000000))
            .unwrap();
        assert_eq!(sized, dec!(5000000));

        let tiny_binance = book(dec!(100000), dec!(0.001));
        let sized = size_trade_krw(&upbit, &tiny_binance, dec!(1300), dec!(100000), dec!(5000000))
            .unwrap();
        assert_eq!(sized, dec!(100000));
    }

    #[test]
    fn test_empty_book_yields_none() {
        let upbit = book(dec!(130000000), dec!(1));
        let empty = OrderBook::default();
        assert!(size_trade_krw(&upbit, &empty, dec!(1300), dec!(1), dec!(2)).is_none());
    }

    #[test]
    fn test_one_sided_book_yields_none() {
        let upbit = book(dec!(130000000), dec!(1));
        let asks_only = OrderBook::new(vec![], vec![BookLevel::new(dec!(100000), dec!(1))]);
        assert!(size_trade_krw(&upbit, &asks_only, dec!(1300), dec!(1), dec!(2)).is_none());
    }
}
