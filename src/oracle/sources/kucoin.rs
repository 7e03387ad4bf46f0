//! KuCoin 24h market stats
//!
//! Unknown symbols are not an error on this endpoint: the payload comes back
//! with `last: null`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const KUCOIN_BASE_URL: &str = "https://api.kucoin.com";

const CODE_OK: &str = "200000";
const CODE_RATE_LIMIT: &str = "429000";

#[derive(Debug, Clone)]
pub struct KuCoinSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl KuCoinSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/api/v1/market/stats")?,
        })
    }

    fn parse(&self, ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        match body["code"].as_str().unwrap_or_default() {
            CODE_OK => {}
            CODE_RATE_LIMIT => {
                return Err(SourceError::RateLimited {
                    domain: host_of(&self.endpoint),
                    retry_after: None,
                })
            }
            other => {
                let msg = body["msg"].as_str().unwrap_or_default();
                return Err(SourceError::malformed(format!(
                    "KuCoin code {:?}: {}",
                    other, msg
                )));
            }
        }

        let data = &body["data"];
        if data["last"].is_null() {
            return Err(SourceError::unsupported(format!("{}-USDT not listed", ticker)));
        }
        let price = required_number(&data["last"], "last")?;
        let change = number(&data["changeRate"]).map(|rate| rate * 100.0);
        let volume = number(&data["volValue"]);
        Ok(Quote::new(SourceId::KuCoin, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for KuCoinSource {
    fn id(&self) -> SourceId {
        SourceId::KuCoin
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("symbol", &format!("{}-USDT", ticker));
        let body = self.http.get_json(url, timeout).await?;
        self.parse(ticker, &body)
    }
}
