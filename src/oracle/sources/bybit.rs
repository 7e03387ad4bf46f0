//! Bybit v5 spot tickers
//!
//! Bybit answers HTTP 200 for business errors; the outcome lives in
//! `retCode` (10001 = bad symbol, 10006 = too many visits).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use super::{endpoint, host_of, number, percent_change, required_number, HttpFetcher, PriceSource};
use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

pub const BYBIT_BASE_URL: &str = "https://api.bybit.com";

const RET_OK: i64 = 0;
const RET_INVALID_SYMBOL: i64 = 10001;
const RET_RATE_LIMIT: i64 = 10006;

#[derive(Debug, Clone)]
pub struct BybitSource {
    http: HttpFetcher,
    endpoint: Url,
}

impl BybitSource {
    pub fn new(http: HttpFetcher, base_url: &str) -> Result<Self> {
        Ok(Self {
            http,
            endpoint: endpoint(base_url, "/v5/market/tickers")?,
        })
    }

    fn parse(&self, ticker: &Ticker, body: &Value) -> Result<Quote, SourceError> {
        let ret_code = body["retCode"]
            .as_i64()
            .ok_or_else(|| SourceError::malformed("missing retCode"))?;
        let ret_msg = body["retMsg"].as_str().unwrap_or_default();

        match ret_code {
            RET_OK => {}
            RET_INVALID_SYMBOL => return Err(SourceError::unsupported(ret_msg)),
            RET_RATE_LIMIT => {
                return Err(SourceError::RateLimited {
                    domain: host_of(&self.endpoint),
                    retry_after: None,
                })
            }
            other => {
                return Err(SourceError::malformed(format!(
                    "Bybit retCode {}: {}",
                    other, ret_msg
                )))
            }
        }

        let entry = body["result"]["list"]
            .as_array()
            .and_then(|list| list.first())
            .ok_or_else(|| SourceError::unsupported(format!("{}USDT not listed", ticker)))?;

        let price = required_number(&entry["lastPrice"], "lastPrice")?;
        let change = number(&entry["price24hPcnt"])
            .map(|fraction| fraction * 100.0)
            .or_else(|| percent_change(price, number(&entry["prevPrice24h"])));

        let volume = number(&entry["turnover24h"]);
        Ok(Quote::new(SourceId::Bybit, ticker.clone(), price, change).with_volume(volume))
    }
}

#[async_trait]
impl PriceSource for BybitSource {
    fn id(&self) -> SourceId {
        SourceId::Bybit
    }

    fn domains(&self) -> Vec<String> {
        vec![host_of(&self.endpoint)]
    }

    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("category", "spot")
            .append_pair("symbol", &format!("{}USDT", ticker));
        let body = self.http.get_json(url, timeout).await?;
        self.parse(ticker, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> BybitSource {
        let http = HttpFetcher::new(Duration::from_secs(1), "test").unwrap();
        BybitSource::new(http, BYBIT_BASE_URL).unwrap()
    }

    #[test]
    fn parses_spot_ticker() {
        let body = json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "spot",
                "list": [{
                    "symbol": "ETHUSDT",
                    "lastPrice": "3100.5",
                    "prevPrice24h": "3000",
                    "price24hPcnt": "0.0335",
                    "turnover24h": "88000000.25"
                }]
            }
        });
        let eth = Ticker::parse("ETH").unwrap();
        let quote = source().parse(&eth, &body).unwrap();
        assert_eq!(quote.price, 3100.5);
        let change = quote.change_24h.unwrap();
        assert!((change - 3.35).abs() < 1e-9);
        assert_eq!(quote.volume_24h, Some(88000000.25));
    }

    #[test]
    fn falls_back_to_prev_price_for_change() {
        let body = json!({
            "retCode": 0,
            "result": { "list": [{ "lastPrice": "110", "prevPrice24h": "100" }] }
        });
        let t = Ticker::parse("ABC").unwrap();
        let quote = source().parse(&t, &body).unwrap();
        assert!((quote.change_24h.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn maps_ret_codes() {
        let t = Ticker::parse("NOPE").unwrap();
        let s = source();

        let err = s
            .parse(&t, &json!({"retCode": 10001, "retMsg": "Not supported symbols"}))
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported");

        let err = s
            .parse(&t, &json!({"retCode": 10006, "retMsg": "Too many visits!"}))
            .unwrap_err();
        assert_eq!(
            err,
            SourceError::RateLimited {
                domain: "api.bybit.com".into(),
                retry_after: None
            }
        );

        let err = s
            .parse(&t, &json!({"retCode": 0, "result": {"list": []}}))
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }
}
