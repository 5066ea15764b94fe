//! USD/KRW fiat rate provider.
//!
//! Backed by 1..N sources tried in order, with a freshness cache and a hard
//! stale ceiling. When every source fails and only an over-age cache entry
//! remains within the ceiling, the rate is served flagged stale; past the
//! ceiling the provider reports unavailable and all conversion paths halt.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Errors from rate fetching.
#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate source {0} failed: {1}")]
    Source(String, String),

    #[error("no exchange rate available from any source")]
    Unavailable,
}

/// One upstream USD/KRW quote source.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Current KRW per USD.
    async fn fetch(&self) -> Result<Decimal, RateError>;
}

/// A served rate with its cache provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiatRate {
    /// KRW per USD.
    pub rate: Decimal,
    /// True when the value came from an over-age cache entry.
    pub stale: bool,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    rate: Decimal,
    fetched_at: Instant,
}

/// Concurrency-safe, caching USD/KRW provider.
pub struct FiatRateProvider {
    sources: Vec<Box<dyn RateSource>>,
    cache_duration: Duration,
    stale_ceiling: Duration,
    cache: Mutex<Option<CacheEntry>>,
}

impl FiatRateProvider {
    /// Default freshness window (5 minutes).
    pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);
    /// Default hard ceiling on serving stale values (1 hour).
    pub const DEFAULT_STALE_CEILING: Duration = Duration::from_secs(3600);

    pub fn new(sources: Vec<Box<dyn RateSource>>) -> Self {
        Self {
            sources,
            cache_duration: Self::DEFAULT_CACHE_DURATION,
            stale_ceiling: Self::DEFAULT_STALE_CEILING,
            cache: Mutex::new(None),
        }
    }

    pub fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    pub fn with_stale_ceiling(mut self, ceiling: Duration) -> Self {
        self.stale_ceiling = ceiling;
        self
    }

    /// Current USD/KRW rate, fresh-cached, refetched, or stale within the
    /// ceiling — in that order of preference.
    pub async fn current(&self) -> Result<FiatRate, RateError> {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        if let Some(entry) = cache.as_ref() {
            if now.duration_since(entry.fetched_at) < self.cache_duration {
                return Ok(FiatRate {
                    rate: entry.rate,
                    stale: false,
                });
            }
        }

        for source in &self.sources {
            match source.fetch().await {
                Ok(rate) => {
                    debug!("Got USD/KRW rate from {}: {}", source.name(), rate);
                    *cache = Some(CacheEntry {
                        rate,
                        fetched_at: Instant::now(),
                    });
                    return Ok(FiatRate { rate, stale: false });
                }
                Err(e) => {
                    debug!("Rate source {} failed: {}", source.name(), e);
                }
            }
        }

        if let Some(entry) = cache.as_ref() {
            let age = now.duration_since(entry.fetched_at);
            if age < self.stale_ceiling {
                warn!(
                    "Using stale USD/KRW rate from cache (age: {}s)",
                    age.as_secs()
                );
                return Ok(FiatRate {
                    rate: entry.rate,
                    stale: true,
                });
            }
        }

        warn!("Failed to get USD/KRW rate from all sources");
        Err(RateError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    struct ScriptedSource {
        name: &'static str,
        rate: Decimal,
        failing: Arc<AtomicBool>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RateSource for ScriptedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Decimal, RateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(RateError::Source(self.name.into(), "down".into()))
            } else {
                Ok(self.rate)
            }
        }
    }

    fn scripted(
        name: &'static str,
        rate: Decimal,
    ) -> (Box<dyn RateSource>, Arc<AtomicBool>, Arc<AtomicU32>) {
        let failing = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));
        (
            Box::new(ScriptedSource {
                name,
                rate,
                failing: Arc::clone(&failing),
                calls: Arc::clone(&calls),
            }),
            failing,
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_value_cached() {
        let (source, _, calls) = scripted("primary", dec!(1300));
        let provider = FiatRateProvider::new(vec![source]);

        let first = provider.current().await.unwrap();
        assert_eq!(first, FiatRate { rate: dec!(1300), stale: false });

        // Second call inside the window hits the cache.
        let second = provider.current().await.unwrap();
        assert!(!second.stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_source_tried_in_order() {
        let (primary, primary_fail, _) = scripted("primary", dec!(1300));
        let (fallback, _, fallback_calls) = scripted("fallback", dec!(1305));
        primary_fail.store(true, Ordering::SeqCst);

        let provider = FiatRateProvider::new(vec![primary, fallback]);
        let rate = provider.current().await.unwrap();
        assert_eq!(rate.rate, dec!(1305));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_lifecycle() {
        // Scenario: success at t=0, sources fail afterwards.
        let (source, failing, _) = scripted("primary", dec!(1300));
        let provider = FiatRateProvider::new(vec![source]);

        assert!(!provider.current().await.unwrap().stale);
        failing.store(true, Ordering::SeqCst);

        // t=30min: cache over freshness window but under ceiling -> stale.
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let at_30 = provider.current().await.unwrap();
        assert_eq!(at_30.rate, dec!(1300));
        assert!(at_30.stale);

        // t=65min: cache now over the 1h ceiling -> unavailable.
        tokio::time::advance(Duration::from_secs(35 * 60)).await;
        assert!(matches!(
            provider.current().await,
            Err(RateError::Unavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_until_ceiling_boundary() {
        let (source, failing, _) = scripted("primary", dec!(1300));
        let provider = FiatRateProvider::new(vec![source])
            .with_cache_duration(Duration::from_secs(300))
            .with_stale_ceiling(Duration::from_secs(3600));

        provider.current().await.unwrap();
        failing.store(true, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(provider.current().await.unwrap().stale);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(provider.current().await.is_err());
    }

    #[tokio::test]
    async fn test_no_sources_no_cache_unavailable() {
        let provider = FiatRateProvider::new(Vec::new());
        assert!(matches!(
            provider.current().await,
            Err(RateError::Unavailable)
        ));
    }
}
