//! Short-TTL quote cache keyed by (source, ticker)

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{Quote, SourceId, Ticker};

#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    inserted_at: Instant,
}

/// Last successful quote per (source, ticker). An entry is valid only while
/// `now - inserted_at < ttl`; expired entries read as absent.
#[derive(Debug)]
pub struct QuoteCache {
    ttl: Duration,
    entries: RwLock<HashMap<(SourceId, Ticker), CacheEntry>>,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, source: SourceId, ticker: &Ticker) -> Option<Quote> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(source, ticker.clone()))
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.quote.clone())
    }

    /// Last write wins
    pub fn put(&self, source: SourceId, ticker: &Ticker, quote: Quote) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (source, ticker.clone()),
            CacheEntry {
                quote,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Physically stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
