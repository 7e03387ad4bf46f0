//! Per-domain rate-limit tracking
//!
//! A domain that answered 429 is blocked until `now + retry_after`. While
//! blocked, the aggregator skips every source that talks to it.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Process-wide rate-limit state, keyed by network host
#[derive(Debug, Default)]
pub struct RateLimiter {
    blocked_until: RwLock<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff the domain is not blocked, or its block has passed.
    /// Expired entries are removed on the way.
    pub fn is_available(&self, domain: &str) -> bool {
        let now = Instant::now();
        {
            let blocked = self.blocked_until.read().unwrap_or_else(|e| e.into_inner());
            match blocked.get(domain) {
                None => return true,
                Some(until) if now < *until => return false,
                Some(_) => {}
            }
        }

        let mut blocked = self.blocked_until.write().unwrap_or_else(|e| e.into_inner());
        // Re-check under the write lock: another task may have re-marked it.
        match blocked.get(domain) {
            Some(until) if now < *until => false,
            Some(_) => {
                blocked.remove(domain);
                debug!(domain = %domain, "Rate limit expired");
                true
            }
            None => true,
        }
    }

    /// Block the domain for `retry_after`, overwriting any earlier block
    pub fn mark_limited(&self, domain: &str, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut blocked = self.blocked_until.write().unwrap_or_else(|e| e.into_inner());
        blocked.insert(domain.to_string(), until);
        warn!(
            domain = %domain,
            retry_after_secs = retry_after.as_secs_f64(),
            "⏳ Domain rate limited"
        );
    }

    pub fn clear(&self, domain: &str) {
        let mut blocked = self.blocked_until.write().unwrap_or_else(|e| e.into_inner());
        blocked.remove(domain);
    }

    pub fn blocked_until(&self, domain: &str) -> Option<Instant> {
        let blocked = self.blocked_until.read().unwrap_or_else(|e| e.into_inner());
        blocked
            .get(domain)
            .copied()
            .filter(|until| Instant::now() < *until)
    }

    /// Domains currently blocked
    pub fn blocked_domains(&self) -> Vec<String> {
        let now = Instant::now();
        let blocked = self.blocked_until.read().unwrap_or_else(|e| e.into_inner());
        let mut domains: Vec<String> = blocked
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(d, _)| d.clone())
            .collect();
        domains.sort();
        domains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn blocked_until_retry_after_elapses() {
        let limiter = RateLimiter::new();
        assert!(limiter.is_available("api.binance.com"));

        limiter.mark_limited("api.binance.com", Duration::from_secs(30));
        assert!(!limiter.is_available("api.binance.com"));
        assert!(limiter.is_available("api.kraken.com"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!limiter.is_available("api.binance.com"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.is_available("api.binance.com"));
        assert!(limiter.blocked_domains().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn later_mark_overwrites_earlier_one() {
        let limiter = RateLimiter::new();
        limiter.mark_limited("api.okx.com", Duration::from_secs(60));
        limiter.mark_limited("api.okx.com", Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.is_available("api.okx.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_unblocks_immediately() {
        let limiter = RateLimiter::new();
        limiter.mark_limited("api.bybit.com", Duration::from_secs(60));
        assert!(limiter.blocked_until("api.bybit.com").is_some());
        assert_eq!(limiter.blocked_domains(), vec!["api.bybit.com".to_string()]);

        limiter.clear("api.bybit.com");
        assert!(limiter.is_available("api.bybit.com"));
        assert!(limiter.blocked_until("api.bybit.com").is_none());
    }
}
