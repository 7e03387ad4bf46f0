//! Core types used throughout PriceBot
//!
//! Tickers, source identifiers, per-source quotes and the aggregated price
//! handed to the delivery layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cryptocurrency symbol, normalized to upper case so comparisons are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Parse from user/config input. Returns `None` for blank input.
    pub fn parse(s: &str) -> Option<Self> {
        let symbol = s.trim();
        if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Ticker(symbol.to_uppercase()))
    }

    /// Upper-case symbol (e.g. "BTC")
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case symbol for APIs that want it (e.g. Huobi "btcusdt")
    pub fn lower(&self) -> String {
        self.0.to_lowercase()
    }

    /// Number of characters, used when sorting consolidated messages
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Ticker {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ticker::parse(&value).ok_or_else(|| format!("invalid ticker: {:?}", value))
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

/// Upstream price source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceId {
    CoinGecko,
    CryptoCompare,
    Binance,
    Kraken,
    GateIo,
    Huobi,
    Okx,
    KuCoin,
    Bybit,
    FxRates,
}

impl SourceId {
    pub const ALL: [SourceId; 10] = [
        SourceId::CoinGecko,
        SourceId::CryptoCompare,
        SourceId::Binance,
        SourceId::Kraken,
        SourceId::GateIo,
        SourceId::Huobi,
        SourceId::Okx,
        SourceId::KuCoin,
        SourceId::Bybit,
        SourceId::FxRates,
    ];

    /// Key used in configuration files and environment overrides
    pub fn config_key(&self) -> &'static str {
        match self {
            SourceId::CoinGecko => "coingecko",
            SourceId::CryptoCompare => "cryptocompare",
            SourceId::Binance => "binance",
            SourceId::Kraken => "kraken",
            SourceId::GateIo => "gateio",
            SourceId::Huobi => "huobi",
            SourceId::Okx => "okx",
            SourceId::KuCoin => "kucoin",
            SourceId::Bybit => "bybit",
            SourceId::FxRates => "fxrates",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::CoinGecko => write!(f, "CoinGecko"),
            SourceId::CryptoCompare => write!(f, "CryptoCompare"),
            SourceId::Binance => write!(f, "Binance"),
            SourceId::Kraken => write!(f, "Kraken"),
            SourceId::GateIo => write!(f, "Gate.io"),
            SourceId::Huobi => write!(f, "Huobi"),
            SourceId::Okx => write!(f, "OKX"),
            SourceId::KuCoin => write!(f, "KuCoin"),
            SourceId::Bybit => write!(f, "Bybit"),
            SourceId::FxRates => write!(f, "FX Rates"),
        }
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        SourceId::ALL
            .into_iter()
            .find(|id| id.config_key() == key)
            .ok_or_else(|| format!("unknown price source: {}", s))
    }
}

/// One successful price reading from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub source: SourceId,
    pub ticker: Ticker,
    /// Price in USD (USDT for exchange spot pairs)
    pub price: f64,
    /// 24h change in percent, when the source reports one
    pub change_24h: Option<f64>,
    /// 24h traded volume in USD, when the source reports one
    pub volume_24h: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(source: SourceId, ticker: Ticker, price: f64, change_24h: Option<f64>) -> Self {
        Self {
            source,
            ticker,
            price,
            change_24h: change_24h.filter(|c| c.is_finite()),
            volume_24h: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_volume(mut self, volume_24h: Option<f64>) -> Self {
        self.volume_24h = volume_24h.filter(|v| v.is_finite() && *v >= 0.0);
        self
    }

    /// A quote may only contribute to a mean if its price is finite and positive
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Direction of the price relative to the previous cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeIndicator {
    Up,
    Down,
    Flat,
    /// No previous price to compare against
    Unknown,
}

impl ChangeIndicator {
    pub fn between(previous: Option<f64>, current: f64) -> Self {
        match previous {
            None => ChangeIndicator::Unknown,
            Some(prev) if current > prev => ChangeIndicator::Up,
            Some(prev) if current < prev => ChangeIndicator::Down,
            Some(_) => ChangeIndicator::Flat,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ChangeIndicator::Up => "📈",
            ChangeIndicator::Down => "📉",
            ChangeIndicator::Flat => "➖",
            ChangeIndicator::Unknown => "",
        }
    }
}

impl fmt::Display for ChangeIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeIndicator::Up => write!(f, "UP"),
            ChangeIndicator::Down => write!(f, "DOWN"),
            ChangeIndicator::Flat => write!(f, "FLAT"),
            ChangeIndicator::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Result of one aggregation for one ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub ticker: Ticker,
    /// Arithmetic mean of the contributing quotes
    pub price: f64,
    /// Mean 24h change over the quotes that reported one
    pub change_24h: Option<f64>,
    /// Mean 24h USD volume over the quotes that reported one
    pub volume_24h: Option<f64>,
    pub indicator: ChangeIndicator,
    /// Contributing quotes, ordered by source
    pub quotes: Vec<Quote>,
    pub computed_at: DateTime<Utc>,
}

impl AggregatedPrice {
    pub fn source_count(&self) -> usize {
        self.quotes.len()
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.quotes.iter().map(|q| q.source).collect()
    }
}

/// Delivery destination with the tickers it wants. Consumed, never stored
/// beyond the current cycle by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub channel_id: String,
    pub tickers: Vec<Ticker>,
}
