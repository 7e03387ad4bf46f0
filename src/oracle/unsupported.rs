//! Registry of (source, ticker) pairs known not to be listed
//!
//! Pairs reported as unsupported are skipped until a recheck deadline so
//! newly listed coins are picked up eventually. Manual blacklist entries
//! never expire.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::types::{SourceId, Ticker};

#[derive(Debug, Default)]
pub struct UnsupportedPairs {
    /// `None` = permanent (manual blacklist)
    pairs: RwLock<HashMap<(SourceId, Ticker), Option<Instant>>>,
}

impl UnsupportedPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unsupported(&self, source: SourceId, ticker: &Ticker) -> bool {
        let pairs = self.pairs.read().unwrap_or_else(|e| e.into_inner());
        match pairs.get(&(source, ticker.clone())) {
            None => false,
            Some(None) => true,
            Some(Some(recheck_at)) => Instant::now() < *recheck_at,
        }
    }

    /// Record that `source` does not list `ticker`; it will be retried after `recheck`
    pub fn mark(&self, source: SourceId, ticker: &Ticker, recheck: Duration) {
        let mut pairs = self.pairs.write().unwrap_or_else(|e| e.into_inner());
        let key = (source, ticker.clone());
        if matches!(pairs.get(&key), Some(None)) {
            return;
        }
        pairs.insert(key, Some(Instant::now() + recheck));
        info!(
            source = %source,
            ticker = %ticker,
            recheck_secs = recheck.as_secs(),
            "Marked pair as unsupported"
        );
    }

    /// Permanently exclude a pair. Returns false if it was already blacklisted.
    pub fn blacklist(&self, source: SourceId, ticker: &Ticker) -> bool {
        let mut pairs = self.pairs.write().unwrap_or_else(|e| e.into_inner());
        let previous = pairs.insert((source, ticker.clone()), None);
        !matches!(previous, Some(None))
    }

    /// Pairs marked unsupported and still pending recheck, with the time left.
    /// Blacklist entries come from config and are not included.
    pub fn marked(&self) -> Vec<(SourceId, Ticker, Duration)> {
        let now = Instant::now();
        let pairs = self.pairs.read().unwrap_or_else(|e| e.into_inner());
        let mut marked: Vec<_> = pairs
            .iter()
            .filter_map(|((source, ticker), recheck_at)| {
                let remaining = recheck_at.map(|at| at.saturating_duration_since(now))?;
                (!remaining.is_zero()).then(|| (*source, ticker.clone(), remaining))
            })
            .collect();
        marked.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        marked
    }

    /// Re-add a previously saved mark without logging it as new
    pub fn restore(&self, source: SourceId, ticker: &Ticker, remaining: Duration) {
        let mut pairs = self.pairs.write().unwrap_or_else(|e| e.into_inner());
        let key = (source, ticker.clone());
        if matches!(pairs.get(&key), Some(None)) || remaining.is_zero() {
            return;
        }
        pairs.insert(key, Some(Instant::now() + remaining));
    }

    /// Drop entries whose recheck deadline has passed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut pairs = self.pairs.write().unwrap_or_else(|e| e.into_inner());
        let before = pairs.len();
        pairs.retain(|_, recheck_at| recheck_at.map_or(true, |at| now < at));
        before - pairs.len()
    }

    pub fn len(&self) -> usize {
        self.pairs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
