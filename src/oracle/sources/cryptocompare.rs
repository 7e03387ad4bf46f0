//! CryptoCompare full price data

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const CRYPTOCOMPARE_BASE_URL: &str = "https://min-api.cryptocompare.com";

#[derive(Debug, Clone)]
pub struct CryptoCompareSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl CryptoCompareSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/data/pricemultifull")?,
        })
    }

    fn parse(&self, ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        // Errors arrive as HTTP 200 with {"Response": "Error", "Message": ...}
        if body["Response"].as_str() == Some("Error") {
            let message = body["Message"].as_str().unwrap_or("unknown error");
            let lower = message.to_lowercase();
            if lower.contains("rate limit") {
                return Err(SourceError::RateLimited {
                    domain: host_of(&self.endpoint),
                    retry_after: None,
                });
            }
            if lower.contains("does not exist") || lower.contains("no data") {
                return Err(SourceError::unsupported(message));
            }
            return Err(SourceError::malformed(message));
        }

        let raw = body["RAW"]
            .get(ticker.as_str())
            .and_then(|coin| coin.get("USD"))
            .ok_or_else(|| SourceError::unsupported(format!("no RAW.{}.USD", ticker)))?;
        let price = required_number(&raw["PRICE"], "PRICE")?;
        let change = number(&raw["CHANGEPCT24HOUR"]);
        let volume = number(&raw["VOLUME24HOURTO"]);
        Ok(Quote::new(SourceId::CryptoCompare, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for CryptoCompareSource {
    fn id(&self) -> SourceId {
        SourceId::CryptoCompare
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("fsyms", ticker.as_str())
            .append_pair("tsyms", "USD");
        let body = self.http.get_json(url, timeout).await?;
        self.parse(ticker, &body)
    }
}
