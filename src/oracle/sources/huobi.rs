//! Huobi (HTX) merged market detail
//!
//! Lower-case symbols (`btcusdt`). Business errors are HTTP 200 with
//! `status: "error"`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, percent_change, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const HUOBI_BASE_URL: &str = "https://api.huobi.pro";

#[derive(Debug, Clone)]
pub struct HuobiSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl HuobiSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/market/detail/merged")?,
        })
    }

    fn parse(ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        if body["status"].as_str() != Some("ok") {
            let message = body["err-msg"].as_str().unwrap_or("unknown error");
            let lower = message.to_lowercase();
            if lower.contains("invalid symbol") || lower.contains("symbol not found") {
                return Err(SourceError::unsupported(message));
            }
            return Err(SourceError::malformed(format!("Huobi error: {}", message)));
        }

        let tick = &body["tick"];
        let price = required_number(&tick["close"], "tick.close")?;
        let change = percent_change(price, number(&tick["open"]));
        let volume = number(&tick["vol"]);
        Ok(Quote::new(SourceId::Huobi, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for HuobiSource {
    fn id(&self) -> SourceId {
        SourceId::Huobi
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("symbol", &format!("{}usdt", ticker.lower()));
        let body = self.http.get_json(url, timeout).await?;
        Self::parse(ticker, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_merged_tick() {
        let body = json!({
            "status": "ok",
            "ch": "market.ethusdt.detail.merged",
            "tick": { "close": 2000.0, "open": 2100.0, "high": 2150.0, "low": 1990.0 }
        });
        let eth = Ticker::parse("ETH").unwrap();
        let quote = HuobiSource::parse(&eth, &body).unwrap();
        assert_eq!(quote.price, 2000.0);
        assert!((quote.change_24h.unwrap() + 4.761904761904762).abs() < 1e-9);
    }

    #[test]
    fn invalid_symbol_is_unsupported() {
        let body = json!({
            "status": "error",
            "err-code": "invalid-parameter",
            "err-msg": "invalid symbol"
        });
        let t = Ticker::parse("NOPE").unwrap();
        assert_eq!(HuobiSource::parse(&t, &body).unwrap_err().kind(), "unsupported");
    }
}
