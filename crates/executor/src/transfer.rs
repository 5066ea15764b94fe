//! Cross-venue deposit polling.
//!
//! A transfer step suspends the trade for minutes to hours. The wait loop
//! polls the destination venue on a fixed cadence against a wall-clock
//! ceiling; a deposit is confirmed either by a balance rise of at least 99%
//! of the expected amount, or by a confirmed deposit-history entry that
//! matches. Cancellation is honored between polls.

use crate::{StrategyError, StrategyResult};
use chrono::Utc;
use kimp_venues::{DepositState, VenueClient};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Balance-rise tolerance: 99% of the expected amount covers the on-chain
/// fee deducted in flight.
const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

/// History-entry tolerance, looser because the entry is venue-confirmed.
const HISTORY_TOLERANCE: Decimal = Decimal::from_parts(9, 0, 0, false, 1);

/// Polling cadence and ceiling for one transfer wait.
#[derive(Debug, Clone, Copy)]
pub struct TransferWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for TransferWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Poll `venue` until `asset` arrives. Returns the observed balance rise
/// (or the confirmed history amount).
pub async fn wait_for_deposit(
    venue: &Arc<dyn VenueClient>,
    asset: &str,
    expected: Decimal,
    baseline_total: Decimal,
    wait: TransferWait,
    shutdown: &mut watch::Receiver<bool>,
) -> StrategyResult<Decimal> {
    let started = tokio::time::Instant::now();
    let started_utc = Utc::now();

    loop {
        if *shutdown.borrow() {
            return Err(StrategyError::Cancelled);
        }
        if started.elapsed() >= wait.timeout {
            return Err(StrategyError::TransferTimeout {
                venue: venue.venue().to_string(),
                asset: asset.to_string(),
            });
        }

        match venue.balance(asset).await {
            Ok(balance) => {
                let rise = balance.total() - baseline_total;
                if rise >= expected * BALANCE_TOLERANCE {
                    debug!("Deposit confirmed on {}: {} {}", venue.venue(), rise, asset);
                    return Ok(rise);
                }
            }
            Err(e) => {
                warn!("Error checking {} balance on {}: {}", asset, venue.venue(), e);
            }
        }

        if let Ok(entries) = venue.deposit_history(asset, Some(started_utc)).await {
            if let Some(entry) = entries.iter().find(|entry| {
                entry.state == DepositState::Confirmed
                    && entry.amount >= expected * HISTORY_TOLERANCE
            }) {
                debug!(
                    "Deposit confirmed via history on {}: {} {}",
                    venue.venue(),
                    entry.amount,
                    asset
                );
                return Ok(entry.amount);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(wait.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kimp_core::Venue;
    use kimp_venues::{DepositEntry, StubVenue};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn short_wait() -> TransferWait {
        TransferWait {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_rise_confirms_deposit() {
        let venue: Arc<dyn VenueClient> = Arc::new({
            let stub = StubVenue::new(Venue::Binance);
            stub.schedule_deposit("BTC", dec!(0.5), 3);
            stub
        });
        let (_tx, mut shutdown) = watch::channel(false);

        let observed = wait_for_deposit(
            &venue,
            "BTC",
            dec!(0.5),
            Decimal::ZERO,
            short_wait(),
            &mut shutdown,
        )
        .await
        .unwrap();
        assert_eq!(observed, dec!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rise_below_tolerance_keeps_waiting() {
        let stub = StubVenue::new(Venue::Binance);
        // 0.4 arrives but 0.5 was expected: under the 99% bar, times out.
        stub.schedule_deposit("BTC", dec!(0.4), 1);
        let venue: Arc<dyn VenueClient> = Arc::new(stub);
        let (_tx, mut shutdown) = watch::channel(false);

        let result = wait_for_deposit(
            &venue,
            "BTC",
            dec!(0.5),
            Decimal::ZERO,
            short_wait(),
            &mut shutdown,
        )
        .await;
        assert!(matches!(
            result,
            Err(StrategyError::TransferTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_entry_confirms_without_balance_rise() {
        let stub = StubVenue::new(Venue::Upbit);
        stub.push_deposit_entry(DepositEntry {
            asset: "USDT".into(),
            amount: dec!(495),
            state: DepositState::Confirmed,
            tx_id: Some("tx-1".into()),
            completed_at: Some(Utc::now()),
        });
        let venue: Arc<dyn VenueClient> = Arc::new(stub);
        let (_tx, mut shutdown) = watch::channel(false);

        let observed = wait_for_deposit(
            &venue,
            "USDT",
            dec!(500),
            dec!(1000),
            short_wait(),
            &mut shutdown,
        )
        .await
        .unwrap();
        assert_eq!(observed, dec!(495));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_ceiling() {
        let venue: Arc<dyn VenueClient> = Arc::new(StubVenue::new(Venue::Binance));
        let (_tx, mut shutdown) = watch::channel(false);

        let before = tokio::time::Instant::now();
        let result = wait_for_deposit(
            &venue,
            "BTC",
            dec!(1),
            Decimal::ZERO,
            short_wait(),
            &mut shutdown,
        )
        .await;
        assert!(matches!(
            result,
            Err(StrategyError::TransferTimeout { .. })
        ));
        assert!(before.elapsed() >= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_polls() {
        let venue: Arc<dyn VenueClient> = Arc::new(StubVenue::new(Venue::Binance));
        let (tx, mut shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move {
            wait_for_deposit(
                &venue,
                "BTC",
                dec!(1),
                Decimal::ZERO,
                TransferWait::default(),
                &mut shutdown,
            )
            .await
        });
        tokio::time::sleep(Duration::from_secs(45)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(StrategyError::Cancelled)));
    }
}
