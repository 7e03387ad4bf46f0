//! CoinGecko simple price API
//!
//! CoinGecko addresses coins by id, not symbol, so only tickers in the
//! static id table are supported.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com";

const COIN_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("ADA", "cardano"),
    ("XRP", "ripple"),
    ("BNB", "binancecoin"),
    ("SOL", "solana"),
    ("DOT", "polkadot"),
    ("DOGE", "dogecoin"),
    ("LTC", "litecoin"),
    ("TRX", "tron"),
    ("AVAX", "avalanche-2"),
    ("LINK", "chainlink"),
    ("MATIC", "matic-network"),
    ("XMR", "monero"),
    ("DAI", "dai"),
    ("OP", "optimism"),
    ("ARB", "arbitrum"),
    ("TON", "the-open-network"),
    ("NOT", "not-financial-advice"),
    ("MAJOR", "major-protocol"),
];

fn coin_id(ticker: &Ticker) -> Option<&'static str> {
    COIN_IDS
        .iter()
        .find(|(symbol, _)| *symbol == ticker.as_str())
        .map(|(_, id)| *id)
}

#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl CoinGeckoSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/api/v3/simple/price")?,
        })
    }

    fn parse(ticker: &Ticker, id: &str, body: &Value) -> Result<Quote, SourceError> {
        // An unknown id yields `{}` rather than an error status
        let coin = body
            .get(id)
            .filter(|v| v.as_object().map_or(false, |o| !o.is_empty()))
            .ok_or_else(|| SourceError::unsupported(format!("no CoinGecko data for {}", id)))?;
        let price = required_number(&coin["usd"], "usd")?;
        let change = number(&coin["usd_24h_change"]);
        let volume = number(&coin["usd_24h_vol"]);
        Ok(Quote::new(SourceId::CoinGecko, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn id(&self) -> SourceId {
        SourceId::CoinGecko
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    fn supports(&self, ticker: &Ticker) -> bool {
        coin_id(ticker).is_some()
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let id = coin_id(ticker)
            .ok_or_else(|| SourceError::unsupported(format!("no CoinGecko id for {}", ticker)))?;
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("ids", id)
            .append_pair("vs_currencies", "usd")
            .append_pair("include_24hr_change", "true")
            .append_pair("include_24hr_vol", "true");
        let body = self.http.get_json(url, timeout).await?;
        Self::parse(ticker, id, &body)
    }
}
