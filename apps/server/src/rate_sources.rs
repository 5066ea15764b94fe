//! HTTP-backed USD/KRW rate sources.
//!
//! Tried in order by the provider: the Dunamu forex quote endpoint first,
//! then a free exchange-rate API as fallback. Both use a short timeout
//! since the provider has fallbacks and a cache behind it.

use async_trait::async_trait;
use kimp_engine::{RateError, RateSource};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

fn http_client() -> Result<reqwest::Client, RateError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| RateError::Source("http".into(), e.to_string()))
}

/// Dunamu forex quote endpoint (KRW per USD, bank reference rate).
pub struct DunamuSource;

#[derive(Debug, Deserialize)]
struct DunamuQuote {
    #[serde(rename = "basePrice")]
    base_price: Decimal,
}

#[async_trait]
impl RateSource for DunamuSource {
    fn name(&self) -> &str {
        "dunamu"
    }

    async fn fetch(&self) -> Result<Decimal, RateError> {
        let url = "https://quotation-api-cdn.dunamu.com/v1/forex/recent?codes=FRX.KRWUSD";
        let quotes: Vec<DunamuQuote> = http_client()?
            .get(url)
            .send()
            .await
            .map_err(|e| RateError::Source(self.name().into(), e.to_string()))?
            .json()
            .await
            .map_err(|e| RateError::Source(self.name().into(), e.to_string()))?;
        quotes
            .first()
            .map(|quote| quote.base_price)
            .ok_or_else(|| RateError::Source(self.name().into(), "empty response".into()))
    }
}

/// exchangerate-api.com fallback.
pub struct ExchangeRateApiSource;

#[derive(Debug, Deserialize)]
struct ExchangeRateApiResponse {
    rates: std::collections::HashMap<String, Decimal>,
}

#[async_trait]
impl RateSource for ExchangeRateApiSource {
    fn name(&self) -> &str {
        "exchangerate-api"
    }

    async fn fetch(&self) -> Result<Decimal, RateError> {
        let url = "https://api.exchangerate-api.com/v4/latest/USD";
        let response: ExchangeRateApiResponse = http_client()?
            .get(url)
            .send()
            .await
            .map_err(|e| RateError::Source(self.name().into(), e.to_string()))?
            .json()
            .await
            .map_err(|e| RateError::Source(self.name().into(), e.to_string()))?;
        response
            .rates
            .get("KRW")
            .copied()
            .ok_or_else(|| RateError::Source(self.name().into(), "KRW missing".into()))
    }
}

/// The standard source chain.
pub fn default_sources() -> Vec<Box<dyn RateSource>> {
    vec![Box::new(DunamuSource), Box::new(ExchangeRateApiSource)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dunamu_response_parses() {
        let raw = r#"[{"code":"FRX.KRWUSD","basePrice":1372.5,"currencyCode":"USD"}]"#;
        let quotes: Vec<DunamuQuote> = serde_json::from_str(raw).unwrap();
        assert_eq!(quotes[0].base_price.to_string(), "1372.5");
    }

    #[test]
    fn test_exchangerate_api_response_parses() {
        let raw = r#"{"base":"USD","rates":{"KRW":1370.12,"EUR":0.92}}"#;
        let response: ExchangeRateApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.rates["KRW"].to_string(), "1370.12");
    }

    #[test]
    fn test_default_chain_order() {
        let sources = default_sources();
        assert_eq!(sources[0].name(), "dunamu");
        assert_eq!(sources[1].name(), "exchangerate-api");
    }
}
