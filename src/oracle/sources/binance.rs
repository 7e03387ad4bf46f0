//! Binance spot 24h ticker
//!
//! `GET /api/v3/ticker/24hr?symbol=BTCUSDT`. Unknown symbols come back as
//! HTTP 400 with code -1121, which the shared fetcher maps to
//! `UnsupportedTicker`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const BINANCE_BASE_URL: &str = "https://api.binance.com";

#[derive(Debug, Clone)]
pub struct BinanceSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl BinanceSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/api/v3/ticker/24hr")?,
        })
    }

    fn trading_pair(ticker: &Ticker) -> String {
        format!("{}USDT", ticker)
    }

    fn parse(ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        let price = required_number(&body["lastPrice"], "lastPrice")?;
        let change = number(&body["priceChangePercent"]);
        let volume = number(&body["quoteVolume"]);
        Ok(Quote::new(SourceId::Binance, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for BinanceSource {
    fn id(&self) -> SourceId {
        SourceId::Binance
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("symbol", &Self::trading_pair(ticker));
        let body = self.http.get_json(url, timeout).await?;
        Self::parse(ticker, &body)
    }
}
