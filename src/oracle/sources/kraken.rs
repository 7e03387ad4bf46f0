//! Kraken public ticker
//!
//! Kraken names Bitcoin `XBT` and Dogecoin `XDG`, and returns the pair under
//! its own canonical key (e.g. `XXBTZUSD`), so the first result entry is used.
//! Errors come back as HTTP 200 with a non-empty `error` array.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, percent_change, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const KRAKEN_BASE_URL: &str = "https://api.kraken.com";

#[derive(Debug, Clone)]
pub struct KrakenSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl KrakenSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/0/public/Ticker")?,
        })
    }

    fn asset_code(ticker: &Ticker) -> &str {
        match ticker.as_str() {
            "BTC" => "XBT",
            "DOGE" => "XDG",
            other => other,
        }
    }

    fn parse(&self, ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        if let Some(errors) = body["error"].as_array().filter(|e| !e.is_empty()) {
            let message = errors
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ");
            if message.contains("Unknown asset pair") {
                return Err(SourceError::unsupported(message));
            }
            if message.contains("Too many requests") || message.contains("Rate limit") {
                return Err(SourceError::RateLimited {
                    domain: host_of(&self.endpoint),
                    retry_after: None,
                });
            }
            return Err(SourceError::malformed(format!("Kraken error: {}", message)));
        }

        let entry = body["result"]
            .as_object()
            .and_then(|result| result.values().next())
            .ok_or_else(|| SourceError::unsupported(format!("no Kraken pair for {}", ticker)))?;

        let price = required_number(&entry["c"][0], "c[0]")?;
        let change = percent_change(price, number(&entry["o"]));
        // v[1] is base volume over the last 24h, p[1] its VWAP
        let volume = number(&entry["v"][1])
            .zip(number(&entry["p"][1]))
            .map(|(base, vwap)| base * vwap);
        Ok(Quote::new(SourceId::Kraken, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for KrakenSource {
    fn id(&self) -> SourceId {
        SourceId::Kraken
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("pair", &format!("{}USD", Self::asset_code(ticker)));
        let body = self.http.get_json(url, timeout).await?;
        self.parse(ticker, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> KrakenSource {
        let http = HttpFetcher::new(Duration::from_secs(1), "test").unwrap();
        KrakenSource::new(http, KRAKEN_BASE_URL).unwrap()
    }

    #[test]
    fn bitcoin_is_xbt() {
        assert_eq!(KrakenSource::asset_code(&Ticker::parse("BTC").unwrap()), "XBT");
        assert_eq!(KrakenSource::asset_code(&Ticker::parse("ETH").unwrap()), "ETH");
    }

    #[test]
    fn parses_first_result_entry() {
        let body = json!({
            "error": [],
            "result": {
                "XXBTZUSD": {
                    "a": ["65010.0", "1", "1.000"],
                    "c": ["65000.0", "0.01"],
                    "v": ["800.0", "1200.0"],
                    "p": ["64800.0", "64500.0"],
                    "o": "64000.0"
                }
            }
        });
        let btc = Ticker::parse("BTC").unwrap();
        let quote = source().parse(&btc, &body).unwrap();
        assert_eq!(quote.price, 65000.0);
        assert!((quote.change_24h.unwrap() - 1.5625).abs() < 1e-9);
        assert_eq!(quote.volume_24h, Some(1200.0 * 64500.0));
    }

    #[test]
    fn body_errors_are_classified() {
        let t = Ticker::parse("NOPE").unwrap();
        let s = source();

        let err = s
            .parse(&t, &json!({"error": ["EQuery:Unknown asset pair"]}))
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported");

        let err = s
            .parse(&t, &json!({"error": ["EAPI:Rate limit exceeded"]}))
            .unwrap_err();
        assert_eq!(err.kind(), "rate_limited");

        let err = s
            .parse(&t, &json!({"error": ["EService:Unavailable"]}))
            .unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }
}
