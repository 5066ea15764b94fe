//! Fee model for a full arbitrage cycle.

use kimp_core::Coin;
use rust_decimal::Decimal;

/// Taker fees and transfer allowances for one round trip.
///
/// A cycle crosses each venue twice (coin leg and stablecoin leg), so four
/// trading fees apply, plus the coin's on-chain withdraw fee and a flat
/// allowance for the stablecoin transfer, both expressed as percent of the
/// trade size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeModel {
    /// Upbit taker fee, percent.
    pub upbit_fee_pct: Decimal,
    /// Binance taker fee, percent.
    pub binance_fee_pct: Decimal,
    /// Flat allowance for the stablecoin transfer leg, percent.
    pub stable_transfer_pct: Decimal,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            upbit_fee_pct: Decimal::from_parts(5, 0, 0, false, 2),
            binance_fee_pct: Decimal::from_parts(1, 0, 0, false, 1),
            stable_transfer_pct: Decimal::from_parts(1, 0, 0, false, 2),
        }
    }
}

impl FeeModel {
    /// Trading fees for the four order legs, percent.
    pub fn trading_fees_pct(&self) -> Decimal {
        (self.upbit_fee_pct + self.binance_fee_pct) * Decimal::TWO
    }

    /// Total estimated fees for a cycle in `coin`, percent of trade size.
    ///
    /// The coin's fixed withdraw fee is converted using its current KRW
    /// price; a zero or missing trade size falls back to the trading fees
    /// plus the stablecoin allowance.
    pub fn total_fees_pct(
        &self,
        coin: &Coin,
        coin_price_krw: Decimal,
        trade_amount_krw: Decimal,
    ) -> Decimal {
        let base = self.trading_fees_pct() + self.stable_transfer_pct;
        if trade_amount_krw <= Decimal::ZERO {
            return base;
        }
        let withdraw_fee_krw = coin.preferred_withdraw_fee() * coin_price_krw;
        base + withdraw_fee_krw / trade_amount_krw * Decimal::ONE_HUNDRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trading_fees_sum_four_legs() {
        let model = FeeModel::default();
        // 2 x 0.05% + 2 x 0.1%
        assert_eq!(model.trading_fees_pct(), dec!(0.30));
    }

    #[test]
    fn test_withdraw_fee_scales_with_trade_size() {
        let model = FeeModel::default();
        let btc = Coin::from_symbol("BTC");
        // 0.0005 BTC at 130M KRW = 65,000 KRW; 1% of a 6.5M KRW trade.
        let fees = model.total_fees_pct(&btc, dec!(130000000), dec!(6500000));
        assert_eq!(fees, dec!(0.30) + dec!(0.01) + dec!(1.00));
    }

    #[test]
    fn test_zero_trade_size_falls_back() {
        let model = FeeModel::default();
        let btc = Coin::from_symbol("BTC");
        assert_eq!(
            model.total_fees_pct(&btc, dec!(130000000), Decimal::ZERO),
            dec!(0.31)
        );
    }
}
