//! Oracle Aggregator - Combines quotes from multiple sources
//!
//! For one ticker, resolves every configured source to a cached quote, a
//! live fetch or a skip; fans the live fetches out concurrently; and reduces
//! the surviving quotes to a simple mean with a change indicator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{AggregateError, SourceError};
use crate::oracle::cache::QuoteCache;
use crate::oracle::rate_limit::RateLimiter;
use crate::oracle::sources::PriceSource;
use crate::oracle::unsupported::UnsupportedPairs;
use crate::types::{AggregatedPrice, ChangeIndicator, Quote, SourceId, Ticker};

/// Tunables supplied at construction
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Per-call timeout shared by every dispatched fetch
    pub fetch_timeout: Duration,
    /// Back-off applied when a 429 carries no usable Retry-After
    pub default_backoff: Duration,
    /// How long an unsupported (source, ticker) pair is skipped
    pub unsupported_recheck: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            default_backoff: Duration::from_secs(60),
            unsupported_recheck: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// How a source is handled for one ticker this cycle
enum Resolution {
    Cached(Quote),
    Dispatch,
    Skip(&'static str),
}

/// Per-ticker multi-source aggregator.
///
/// The rate limiter, cache and unsupported registry are injected so several
/// aggregators (or tests) can share or isolate them.
pub struct PriceAggregator {
    sources: Vec<Arc<dyn PriceSource>>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<QuoteCache>,
    unsupported: Arc<UnsupportedPairs>,
    previous: Mutex<HashMap<Ticker, f64>>,
    settings: AggregatorSettings,
}

impl PriceAggregator {
    pub fn new(
        sources: Vec<Arc<dyn PriceSource>>,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<QuoteCache>,
        unsupported: Arc<UnsupportedPairs>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            sources,
            rate_limiter,
            cache,
            unsupported,
            previous: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    pub fn unsupported(&self) -> &Arc<UnsupportedPairs> {
        &self.unsupported
    }

    /// Seed the previous-price map, e.g. from persisted history
    pub fn seed_previous<I>(&self, prices: I)
    where
        I: IntoIterator<Item = (Ticker, f64)>,
    {
        let mut previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());
        for (ticker, price) in prices {
            if price.is_finite() && price > 0.0 {
                previous.insert(ticker, price);
            }
        }
    }

    pub fn previous_price(&self, ticker: &Ticker) -> Option<f64> {
        let previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());
        previous.get(ticker).copied()
    }

    /// Make delivered prices the baseline for the next change indicator
    pub fn commit<'a, I>(&self, prices: I)
    where
        I: IntoIterator<Item = &'a AggregatedPrice>,
    {
        self.seed_previous(prices.into_iter().map(|p| (p.ticker.clone(), p.price)));
    }

    /// Drop expired cache and unsupported-pair entries
    pub fn purge_expired(&self) {
        let cache = self.cache.purge_expired();
        let pairs = self.unsupported.purge_expired();
        if cache > 0 || pairs > 0 {
            debug!(cache, pairs, "Purged expired entries");
        }
    }

    fn resolve(&self, source: &dyn PriceSource, ticker: &Ticker) -> Resolution {
        let id = source.id();
        if let Some(quote) = self.cache.get(id, ticker) {
            return Resolution::Cached(quote);
        }
        if !source.supports(ticker) {
            return Resolution::Skip("not listed");
        }
        if self.unsupported.is_unsupported(id, ticker) {
            return Resolution::Skip("known unsupported");
        }
        if !source
            .domains()
            .iter()
            .all(|domain| self.rate_limiter.is_available(domain))
        {
            return Resolution::Skip("rate limited");
        }
        Resolution::Dispatch
    }

    /// Aggregate one ticker across every configured source.
    ///
    /// Returns `NoSourcesAvailable` when no quote survives; a zero or
    /// missing price is never reported. The indicator compares against the
    /// last [`commit`](Self::commit)ted price, which this call leaves alone.
    pub async fn get_price(&self, ticker: &Ticker) -> Result<AggregatedPrice, AggregateError> {
        let mut quotes: Vec<Quote> = Vec::with_capacity(self.sources.len());
        let mut fetches = JoinSet::new();
        let timeout = self.settings.fetch_timeout;

        for source in &self.sources {
            match self.resolve(source.as_ref(), ticker) {
                Resolution::Cached(quote) => {
                    debug!(ticker = %ticker, source = %quote.source, price = quote.price, "Cache hit");
                    quotes.push(quote);
                }
                Resolution::Skip(reason) => {
                    debug!(ticker = %ticker, source = %source.id(), reason, "Skipping source");
                }
                Resolution::Dispatch => {
                    let source = Arc::clone(source);
                    let ticker = ticker.clone();
                    fetches.spawn(async move {
                        let id = source.id();
                        let result = tokio::time::timeout(timeout, source.fetch(&ticker, timeout))
                            .await
                            .unwrap_or(Err(SourceError::Timeout));
                        (id, result)
                    });
                }
            }
        }

        while let Some(joined) = fetches.join_next().await {
            let (source, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(ticker = %ticker, error = %e, "Fetch task failed");
                    continue;
                }
            };
            match result {
                Ok(quote) if quote.is_valid() => {
                    debug!(ticker = %ticker, source = %source, price = quote.price, "Fetched quote");
                    self.cache.put(source, ticker, quote.clone());
                    quotes.push(quote);
                }
                Ok(quote) => {
                    let err = SourceError::malformed(format!("unusable price {}", quote.price));
                    warn!(ticker = %ticker, source = %source, error = %err, "Discarding quote");
                }
                Err(err) => self.record_failure(source, ticker, err),
            }
        }

        if quotes.is_empty() {
            warn!(ticker = %ticker, "No sources available");
            return Err(AggregateError::NoSourcesAvailable {
                ticker: ticker.clone(),
            });
        }

        quotes.sort_by_key(|q| q.source);
        let price = quotes.iter().map(|q| q.price).sum::<f64>() / quotes.len() as f64;
        let change_24h = mean(quotes.iter().filter_map(|q| q.change_24h));
        let volume_24h = mean(quotes.iter().filter_map(|q| q.volume_24h));
        let indicator = ChangeIndicator::between(self.previous_price(ticker), price);

        info!(
            ticker = %ticker,
            price,
            sources = quotes.len(),
            indicator = %indicator,
            "✅ Aggregated price"
        );

        Ok(AggregatedPrice {
            ticker: ticker.clone(),
            price,
            change_24h,
            volume_24h,
            indicator,
            quotes,
            computed_at: Utc::now(),
        })
    }

    fn record_failure(&self, source: SourceId, ticker: &Ticker, err: SourceError) {
        match &err {
            SourceError::RateLimited {
                domain,
                retry_after,
            } => {
                self.rate_limiter
                    .mark_limited(domain, retry_after.unwrap_or(self.settings.default_backoff));
            }
            SourceError::UnsupportedTicker(_) => {
                self.unsupported
                    .mark(source, ticker, self.settings.unsupported_recheck);
            }
            _ => {}
        }
        warn!(
            ticker = %ticker,
            source = %source,
            kind = err.kind(),
            error = %err,
            "Source fetch failed"
        );
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        id: SourceId,
        result: Result<(f64, Option<f64>), SourceError>,
        volume: Option<f64>,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn ok(id: SourceId, price: f64, change: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                id,
                result: Ok((price, change)),
                volume: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn with_volume(id: SourceId, price: f64, volume: f64) -> Arc<Self> {
            Arc::new(Self {
                id,
                result: Ok((price, None)),
                volume: Some(volume),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(id: SourceId, err: SourceError) -> Arc<Self> {
            Arc::new(Self {
                id,
                result: Err(err),
                volume: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceSource for StaticSource {
        fn id(&self) -> SourceId {
            self.id
        }

        fn domains(&self) -> Vec<String> {
            vec![format!("{}.test", self.id.config_key())]
        }

        async fn fetch(&self, ticker: &Ticker, _timeout: Duration) -> Result<Quote, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map(|(price, change)| {
                    Quote::new(self.id, ticker.clone(), price, change).with_volume(self.volume)
                })
        }
    }

    fn aggregator(sources: Vec<Arc<dyn PriceSource>>) -> PriceAggregator {
        PriceAggregator::new(
            sources,
            Arc::new(RateLimiter::new()),
            Arc::new(QuoteCache::new(Duration::from_secs(60))),
            Arc::new(UnsupportedPairs::new()),
            AggregatorSettings::default(),
        )
    }

    fn btc() -> Ticker {
        Ticker::parse("BTC").unwrap()
    }

    #[tokio::test]
    async fn averages_available_24h_changes() {
        let agg = aggregator(vec![
            StaticSource::ok(SourceId::Binance, 100.0, Some(2.0)),
            StaticSource::ok(SourceId::Kraken, 100.0, Some(4.0)),
            StaticSource::ok(SourceId::FxRates, 100.0, None),
        ]);
        let result = agg.get_price(&btc()).await.unwrap();
        assert_eq!(result.change_24h, Some(3.0));
        assert_eq!(
            result.sources(),
            vec![SourceId::Binance, SourceId::Kraken, SourceId::FxRates]
        );
    }

    #[tokio::test]
    async fn averages_available_24h_volumes() {
        let agg = aggregator(vec![
            StaticSource::with_volume(SourceId::Binance, 100.0, 1_000_000.0),
            StaticSource::with_volume(SourceId::Okx, 101.0, 3_000_000.0),
            StaticSource::ok(SourceId::FxRates, 102.0, None),
        ]);
        let result = agg.get_price(&btc()).await.unwrap();
        assert_eq!(result.volume_24h, Some(2_000_000.0));

        let agg = aggregator(vec![StaticSource::ok(SourceId::FxRates, 102.0, None)]);
        assert_eq!(agg.get_price(&btc()).await.unwrap().volume_24h, None);
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_follows_previous_price() {
        let agg = aggregator(vec![StaticSource::ok(SourceId::Okx, 100.0, None)]);

        let first = agg.get_price(&btc()).await.unwrap();
        assert_eq!(first.indicator, ChangeIndicator::Unknown);
        assert_eq!(agg.previous_price(&btc()), None);

        agg.seed_previous([(btc(), 90.0)]);
        tokio::time::advance(Duration::from_secs(61)).await;
        let second = agg.get_price(&btc()).await.unwrap();
        assert_eq!(second.indicator, ChangeIndicator::Up);

        // Not committed yet: still compared against 90
        let again = agg.get_price(&btc()).await.unwrap();
        assert_eq!(again.indicator, ChangeIndicator::Up);
        assert_eq!(agg.previous_price(&btc()), Some(90.0));

        agg.commit([&second]);
        assert_eq!(agg.previous_price(&btc()), Some(100.0));
        tokio::time::advance(Duration::from_secs(61)).await;
        let third = agg.get_price(&btc()).await.unwrap();
        assert_eq!(third.indicator, ChangeIndicator::Flat);
    }

    #[tokio::test]
    async fn non_positive_prices_are_discarded() {
        let agg = aggregator(vec![
            StaticSource::ok(SourceId::Binance, 0.0, None),
            StaticSource::ok(SourceId::Kraken, -5.0, None),
        ]);
        let err = agg.get_price(&btc()).await.unwrap_err();
        assert_eq!(err, AggregateError::NoSourcesAvailable { ticker: btc() });
        assert!(agg.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_pairs_are_not_retried_until_recheck() {
        let source = StaticSource::err(SourceId::Huobi, SourceError::unsupported("invalid symbol"));
        let agg = aggregator(vec![source.clone()]);

        assert!(agg.get_price(&btc()).await.is_err());
        assert!(agg.get_price(&btc()).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(agg.unsupported().is_unsupported(SourceId::Huobi, &btc()));

        tokio::time::advance(AggregatorSettings::default().unsupported_recheck).await;
        assert!(agg.get_price(&btc()).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_retry_after_uses_default_backoff() {
        let source = StaticSource::err(
            SourceId::Bybit,
            SourceError::RateLimited {
                domain: "bybit.test".into(),
                retry_after: None,
            },
        );
        let agg = aggregator(vec![source.clone()]);
        assert!(agg.get_price(&btc()).await.is_err());
        assert!(!agg.rate_limiter().is_available("bybit.test"));
        assert!(!agg.unsupported().is_unsupported(SourceId::Bybit, &btc()));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!agg.rate_limiter().is_available("bybit.test"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(agg.rate_limiter().is_available("bybit.test"));
    }
}
