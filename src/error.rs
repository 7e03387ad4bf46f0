//! Error taxonomy for fetching, aggregating and scheduling

use std::time::Duration;
use thiserror::Error;

use crate::types::Ticker;

/// Failure of a single source call. Contained inside the aggregator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered 429 (or an equivalent throttling signal).
    /// `retry_after` is the server-provided delay, if any.
    #[error("rate limited on {domain}")]
    RateLimited {
        domain: String,
        retry_after: Option<Duration>,
    },

    #[error("ticker not supported: {0}")]
    UnsupportedTicker(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl SourceError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        SourceError::MalformedResponse(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        SourceError::UnsupportedTicker(msg.into())
    }

    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Timeout => "timeout",
            SourceError::Network(_) => "network",
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::UnsupportedTicker(_) => "unsupported",
            SourceError::MalformedResponse(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::MalformedResponse(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// Ticker-level failure surfaced to the scheduler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("no sources available for {ticker}")]
    NoSourcesAvailable { ticker: Ticker },
}

/// Whole-cycle failure; triggers the retry back-off
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    #[error("no prices available for any of {} tickers", .tickers.len())]
    NoPricesAvailable { tickers: Vec<Ticker> },

    #[error("delivery failed: {0}")]
    Delivery(String),
}
