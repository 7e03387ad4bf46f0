//! FX Rates API
//!
//! Publishes USD-based rates (units of coin per dollar), so the USD price is
//! the reciprocal. Only a fixed set of coins is carried and the feed has no
//! 24h change.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const FXRATES_BASE_URL: &str = "https://api.fxratesapi.com";

const SUPPORTED: &[&str] = &[
    "BTC", "ETH", "ADA", "XRP", "BNB", "SOL", "DOT", "LTC", "TRX", "DAI", "OP", "ARB",
];

#[derive(Debug, Clone)]
pub struct FxRatesSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl FxRatesSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/latest")?,
        })
    }

    fn parse(ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        if body["success"].as_bool() != Some(true) {
            return Err(SourceError::malformed("FX Rates reported success=false"));
        }
        let rate_value = body["rates"]
            .get(ticker.as_str())
            .ok_or_else(|| SourceError::unsupported(format!("no FX rate for {}", ticker)))?;
        let rate = required_number(rate_value, "rate")?;
        if rate <= 0.0 {
            return Err(SourceError::malformed(format!("non-positive rate {}", rate)));
        }
        Ok(Quote::new(SourceId::FxRates, ticker.clone(), 1.0 / rate, None))
    }
}

#[async_trait]
impl PriceSource for FxRatesSource {
    fn id(&self) -> SourceId {
        SourceId::FxRates
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    fn supports(&self, ticker: &Ticker) -> bool {
        SUPPORTED.contains(&ticker.as_str())
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        if !self.supports(ticker) {
            return Err(SourceError::unsupported(format!(
                "{} not carried by FX Rates",
                ticker
            )));
        }
        let body = self.http.get_json(self.endpoint.clone(), timeout).await?;
        Self::parse(ticker, &body)
    }
}
