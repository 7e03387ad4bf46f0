//! Price source implementations
//!
//! One adapter per upstream API. Each owns its symbol mapping and response
//! parsing; the shared [`HttpFetcher`] turns HTTP status codes into the
//! [`SourceError`] taxonomy so adapters only deal with payloads.

mod binance;
mod bybit;
mod coingecko;
mod cryptocompare;
mod fxrates;
mod gateio;
mod huobi;
mod kraken;
mod kucoin;
mod okx;

pub use binance::{BinanceSource, BINANCE_BASE_URL};
pub use bybit::{BybitSource, BYBIT_BASE_URL};
pub use coingecko::{CoinGeckoSource, COINGECKO_BASE_URL};
pub use cryptocompare::{CryptoCompareSource, CRYPTOCOMPARE_BASE_URL};
pub use fxrates::{FxRatesSource, FXRATES_BASE_URL};
pub use gateio::{GateIoSource, GATEIO_BASE_URL};
pub use huobi::{HuobiSource, HUOBI_BASE_URL};
pub use kraken::{KrakenSource, KRAKEN_BASE_URL};
pub use kucoin::{KuCoinSource, KUCOIN_BASE_URL};
pub use okx::{OkxSource, OKX_BASE_URL};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::SourceError;
use crate::types::{Quote, SourceId, Ticker};

/// Trait for price source clients
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Source identifier
    fn id(&self) -> SourceId;

    /// Network hosts this source calls; the unit of rate-limit tracking
    fn domains(&self) -> Vec<String>;

    /// Whether the source's symbol table covers the ticker. Sources that
    /// accept any symbol return true and report `UnsupportedTicker` from
    /// `fetch` instead.
    fn supports(&self, _ticker: &Ticker) -> bool {
        true
    }

    /// Fetch one quote. Performs no caching.
    async fn fetch(&self, ticker: &Ticker, timeout: Duration) -> Result<Quote, SourceError>;
}

/// Shared HTTP client for all adapters
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// 429/418 become `RateLimited` (with the parsed `Retry-After`), 400/404
    /// whose body names an unknown symbol become `UnsupportedTicker`.
    pub async fn get_json(&self, url: Url, timeout: Duration) -> Result<Value, SourceError> {
        let domain = host_of(&url);
        debug!(domain = %domain, path = %url.path(), "GET");

        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(SourceError::RateLimited {
                domain,
                retry_after,
            });
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            if mentions_unknown_symbol(&body) {
                return Err(SourceError::unsupported(truncate(&body, 200)));
            }
            return Err(SourceError::Network(format!("HTTP {} from {}", status, domain)));
        }

        if !status.is_success() {
            return Err(SourceError::Network(format!("HTTP {} from {}", status, domain)));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| SourceError::malformed(format!("invalid JSON from {}: {}", domain, e)))
    }
}

/// Build the enabled adapters against their production endpoints
pub fn build_sources(http: &HttpFetcher, enabled: &[SourceId]) -> Result<Vec<Arc<dyn PriceSource>>> {
    let mut sources: Vec<Arc<dyn PriceSource>> = Vec::with_capacity(enabled.len());
    for id in enabled {
        let http = http.clone();
        let source: Arc<dyn PriceSource> = match id {
            SourceId::CoinGecko => Arc::new(CoinGeckoSource::new(http, COINGECKO_BASE_URL)?),
            SourceId::CryptoCompare => {
                Arc::new(CryptoCompareSource::new(http, CRYPTOCOMPARE_BASE_URL)?)
            }
            SourceId::Binance => Arc::new(BinanceSource::new(http, BINANCE_BASE_URL)?),
            SourceId::Kraken => Arc::new(KrakenSource::new(http, KRAKEN_BASE_URL)?),
            SourceId::GateIo => Arc::new(GateIoSource::new(http, GATEIO_BASE_URL)?),
            SourceId::Huobi => Arc::new(HuobiSource::new(http, HUOBI_BASE_URL)?),
            SourceId::Okx => Arc::new(OkxSource::new(http, OKX_BASE_URL)?),
            SourceId::KuCoin => Arc::new(KuCoinSource::new(http, KUCOIN_BASE_URL)?),
            SourceId::Bybit => Arc::new(BybitSource::new(http, BYBIT_BASE_URL)?),
            SourceId::FxRates => Arc::new(FxRatesSource::new(http, FXRATES_BASE_URL)?),
        };
        sources.push(source);
    }
    Ok(sources)
}

/// Resolve `path` against `base_url`
pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    Url::parse(base_url)
        .and_then(|base| base.join(path))
        .with_context(|| format!("Invalid endpoint {}{}", base_url, path))
}

pub(crate) fn host_of(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => url.as_str().to_string(),
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP date. Zero/past values
/// yield `None` so the caller's default back-off applies.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }
    let at: DateTime<Utc> = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

fn mentions_unknown_symbol(body: &str) -> bool {
    let body = body.to_lowercase();
    ["unknown", "not found", "invalid", "pair", "symbol", "does not exist"]
        .iter()
        .any(|term| body.contains(term))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Numbers arrive as JSON numbers or as decimal strings depending on the API
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

pub(crate) fn required_number(value: &Value, field: &str) -> Result<f64, SourceError> {
    number(value).ok_or_else(|| SourceError::malformed(format!("missing or invalid {}", field)))
}

/// Percent change from `open` to `last`, if `open` is usable
pub(crate) fn percent_change(last: f64, open: Option<f64>) -> Option<f64> {
    open.filter(|o| *o > 0.0).map(|o| (last - o) / o * 100.0)
}
