//! Paper-trading session report.
//!
//! Written at shutdown in dry-run mode: virtual P&L against the initial
//! capital plus the simulated trade and transfer counts, to the log and a
//! JSON file next to the paper state.

use kimp_core::Venue;
use kimp_venues::PaperLedger;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub initial_value_krw: Decimal,
    pub final_value_krw: Decimal,
    pub profit_loss_krw: Decimal,
    pub profit_loss_pct: Decimal,
    pub trade_count: usize,
    pub transfer_count: usize,
}

/// Value the ledger in KRW and compare against the initial capital.
pub fn build_report(
    ledger: &Arc<PaperLedger>,
    initial_value_krw: Decimal,
    fiat_rate: Decimal,
) -> SessionReport {
    let mut final_value_krw = Decimal::ZERO;
    for venue in [Venue::Upbit, Venue::Binance] {
        for (asset, balance) in ledger.balances_of(venue) {
            let value = match asset.as_str() {
                "KRW" => balance.total(),
                // Stablecoin at the fiat rate; other coins are ignored in
                // the summary since their venue value needs live prices.
                "USDT" => balance.total() * fiat_rate,
                _ => Decimal::ZERO,
            };
            final_value_krw += value;
        }
    }
    let profit_loss_krw = final_value_krw - initial_value_krw;
    let profit_loss_pct = if initial_value_krw > Decimal::ZERO {
        profit_loss_krw / initial_value_krw * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };
    SessionReport {
        initial_value_krw,
        final_value_krw,
        profit_loss_krw,
        profit_loss_pct,
        trade_count: ledger.trades().len(),
        transfer_count: ledger.transfers().len(),
    }
}

/// Log the report and persist it as JSON.
pub fn write_report(report: &SessionReport, path: &str) {
    info!(
        "Paper session - P&L: {} KRW ({:.2}%), trades: {}, transfers: {}",
        report.profit_loss_krw, report.profit_loss_pct, report.trade_count, report.transfer_count
    );
    match serde_json::to_string_pretty(report) {
        Ok(serialized) => {
            if let Err(e) = std::fs::write(path, serialized) {
                warn!("Failed to write session report: {e}");
            }
        }
        Err(e) => warn!("Failed to serialize session report: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_report_values_ledger_in_krw() {
        let ledger = PaperLedger::new(
            &[
                (Venue::Upbit, "KRW", dec!(10000000)),
                (Venue::Binance, "USDT", dec!(10000)),
            ],
            None,
        );
        let report = build_report(&ledger, dec!(20000000), dec!(1300));
        // 10M KRW + 10k USDT * 1300 = 23M.
        assert_eq!(report.final_value_krw, dec!(23000000));
        assert_eq!(report.profit_loss_krw, dec!(3000000));
        assert_eq!(report.profit_loss_pct, dec!(15));
        assert_eq!(report.trade_count, 0);
    }
}
