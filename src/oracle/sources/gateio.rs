//! Gate.io spot tickers

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const GATEIO_BASE_URL: &str = "https://api.gateio.ws";

#[derive(Debug, Clone)]
pub struct GateIoSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl GateIoSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/api/v4/spot/tickers")?,
        })
    }

    fn parse(ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        let entry = body
            .as_array()
            .ok_or_else(|| SourceError::malformed("expected a ticker array"))?
            .first()
            .ok_or_else(|| SourceError::unsupported(format!("{}_USDT not listed", ticker)))?;
        let price = required_number(&entry["last"], "last")?;
        let change = number(&entry["change_percentage"]);
        let volume = number(&entry["quote_volume"]);
        Ok(Quote::new(SourceId::GateIo, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for GateIoSource {
    fn id(&self) -> SourceId {
        SourceId::GateIo
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("currency_pair", &format!("{}_USDT", ticker));
        let body = self.http.get_json(url, timeout).await?;
        Self::parse(ticker, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_ticker() {
        let body = json!([{
            "currency_pair": "TON_USDT",
            "last": "5.432",
            "change_percentage": "-3.1"
        }]);
        let ton = Ticker::parse("TON").unwrap();
        let quote = GateIoSource::parse(&ton, &body).unwrap();
        assert_eq!(quote.price, 5.432);
        assert_eq!(quote.change_24h, Some(-3.1));
    }

    #[test]
    fn empty_array_is_unsupported() {
        let t = Ticker::parse("NOPE").unwrap();
        assert_eq!(GateIoSource::parse(&t, &json!([])).unwrap_err().kind(), "unsupported");
        assert_eq!(GateIoSource::parse(&t, &json!({})).unwrap_err().kind(), "malformed");
    }
}
