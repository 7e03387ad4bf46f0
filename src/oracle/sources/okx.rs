//! OKX v5 market ticker

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, percent_change, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const OKX_BASE_URL: &str = "https://www.okx.com";

/// Instrument ID doesn't exist
const CODE_UNKNOWN_INSTRUMENT: &str = "51001";
const CODE_RATE_LIMIT: &str = "50011";

#[derive(Debug, Clone)]
pub struct OkxSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl OkxSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/api/v5/market/ticker")?,
        })
    }

    fn parse(&self, ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        let code = body["code"].as_str().unwrap_or_default();
        let msg = body["msg"].as_str().unwrap_or_default();
        match code {
            "0" => {}
            CODE_UNKNOWN_INSTRUMENT => return Err(SourceError::unsupported(msg)),
            CODE_RATE_LIMIT => {
                return Err(SourceError::RateLimited {
                    domain: host_of(&self.endpoint),
                    retry_after: None,
                })
            }
            _ => return Err(SourceError::malformed(format!("OKX code {:?}: {}", code, msg))),
        }

        let entry = body["data"]
            .as_array()
            .and_then(|data| data.first())
            .ok_or_else(|| SourceError::unsupported(format!("{}-USDT not listed", ticker)))?;
        let price = required_number(&entry["last"], "last")?;
        let change = percent_change(price, number(&entry["open24h"]));
        let volume = number(&entry["volCcy24h"]);
        Ok(Quote::new(SourceId::Okx, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for OkxSource {
    fn id(&self) -> SourceId {
        SourceId::Okx
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("instId", &format!("{}-USDT", ticker));
        let body = self.http.get_json(url, timeout).await?;
        self.parse(ticker, &body)
    }
}
