//! Update scheduler
//!
//! Runs one aggregation cycle per `update_interval` across the union of all
//! channels' tickers, hands the results to a [`PriceSink`], and falls back to
//! `retry_interval` after a failed cycle.
//!
//! Cycle starts are spaced by the interval rather than by the gap between
//! cycles: the next cycle starts at `max(now, previous_start + interval)`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{AggregateError, CycleError};
use crate::oracle::PriceAggregator;
use crate::persistence::{CsvPriceLog, PriceHistory, UnsupportedPairsStore};
use crate::types::{AggregatedPrice, ChannelRequest, Ticker};

/// Delivery layer seam. Receives every ticker that produced a price this cycle.
#[async_trait]
pub trait PriceSink: Send + Sync {
    async fn publish(&self, prices: &BTreeMap<Ticker, AggregatedPrice>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running { cycle: u64 },
    Sleeping { cycle: u64, until: Instant },
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub update_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(120),
            retry_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub prices: BTreeMap<Ticker, AggregatedPrice>,
    /// Tickers that had no available source this cycle
    pub failed: Vec<Ticker>,
    pub elapsed: Duration,
}

/// Deduplicated union of every channel's tickers, in first-seen order
pub fn active_tickers(channels: &[ChannelRequest]) -> Vec<Ticker> {
    let mut tickers: Vec<Ticker> = Vec::new();
    for ticker in channels.iter().flat_map(|c| c.tickers.iter()) {
        if !tickers.contains(ticker) {
            tickers.push(ticker.clone());
        }
    }
    tickers
}

/// `max(now, previous_start + interval)`
pub fn next_cycle_start(previous_start: Instant, interval: Duration, now: Instant) -> Instant {
    (previous_start + interval).max(now)
}

pub struct Scheduler {
    aggregator: Arc<PriceAggregator>,
    sink: Arc<dyn PriceSink>,
    tickers: Vec<Ticker>,
    settings: SchedulerSettings,
    history: Option<PriceHistory>,
    price_log: Option<CsvPriceLog>,
    unsupported_store: Option<UnsupportedPairsStore>,
    state: SchedulerState,
    cycle: u64,
}

impl Scheduler {
    pub fn new(
        aggregator: Arc<PriceAggregator>,
        sink: Arc<dyn PriceSink>,
        channels: &[ChannelRequest],
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            aggregator,
            sink,
            tickers: active_tickers(channels),
            settings,
            history: None,
            price_log: None,
            unsupported_store: None,
            state: SchedulerState::Idle,
            cycle: 0,
        }
    }

    /// Persist last prices after each cycle and seed the aggregator from them
    pub fn with_history(mut self, history: PriceHistory) -> Self {
        self.aggregator.seed_previous(history.entries());
        self.history = Some(history);
        self
    }

    pub fn with_price_log(mut self, log: CsvPriceLog) -> Self {
        self.price_log = Some(log);
        self
    }

    /// Save the aggregator's unsupported pairs after each cycle and on stop
    pub fn with_unsupported_store(mut self, store: UnsupportedPairsStore) -> Self {
        self.unsupported_store = Some(store);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    /// Run a single cycle. Per-ticker failures are reported, not fatal; the
    /// cycle fails only when no ticker got a price or delivery fails.
    ///
    /// Prices become the indicator baseline and are written to history and
    /// the CSV log only once delivered.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.cycle += 1;
        let cycle = self.cycle;
        self.state = SchedulerState::Running { cycle };
        let started = Instant::now();

        info!(cycle, tickers = self.tickers.len(), "🔄 Starting update cycle");
        self.aggregator.purge_expired();

        let aggregator = &self.aggregator;
        let results = join_all(self.tickers.iter().map(|t| aggregator.get_price(t))).await;

        let mut prices = BTreeMap::new();
        let mut failed = Vec::new();
        for (ticker, result) in self.tickers.iter().zip(results) {
            match result {
                Ok(price) => {
                    prices.insert(ticker.clone(), price);
                }
                Err(AggregateError::NoSourcesAvailable { ticker }) => {
                    warn!(cycle, ticker = %ticker, "⚠️ No price this cycle");
                    failed.push(ticker);
                }
            }
        }

        self.save_unsupported(false);

        if prices.is_empty() && !failed.is_empty() {
            return Err(CycleError::NoPricesAvailable { tickers: failed });
        }

        self.sink
            .publish(&prices)
            .await
            .map_err(|e| CycleError::Delivery(format!("{:#}", e)))?;

        self.aggregator.commit(prices.values());
        self.persist(&prices).await;

        let elapsed = started.elapsed();
        info!(
            cycle,
            published = prices.len(),
            failed = failed.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "✅ Cycle complete"
        );

        Ok(CycleReport {
            cycle,
            prices,
            failed,
            elapsed,
        })
    }

    fn save_unsupported(&mut self, force: bool) {
        let Some(store) = self.unsupported_store.as_mut() else {
            return;
        };
        let registry = self.aggregator.unsupported();
        let result = if force {
            store.save(registry)
        } else {
            store.save_if_due(registry).map(|_| ())
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to save unsupported pairs");
        }
    }

    async fn persist(&mut self, prices: &BTreeMap<Ticker, AggregatedPrice>) {
        if let Some(history) = self.history.as_mut() {
            for price in prices.values() {
                history.update(price);
            }
            if let Err(e) = history.save() {
                warn!(error = %e, "Failed to save price history");
            }
        }

        if let Some(log) = &self.price_log {
            let rows: Vec<AggregatedPrice> = prices.values().cloned().collect();
            if let Err(e) = log.append(&rows).await {
                warn!(error = %e, "Failed to append price log");
            }
        }
    }

    /// Loop until `shutdown` resolves. Shutdown is observed between cycles;
    /// a running cycle always completes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let cycle_start = Instant::now();
            let until = match self.run_cycle().await {
                Ok(_) => next_cycle_start(cycle_start, self.settings.update_interval, Instant::now()),
                Err(e) => {
                    error!(
                        cycle = self.cycle,
                        error = %e,
                        retry_secs = self.settings.retry_interval.as_secs(),
                        "❌ Cycle failed, retrying"
                    );
                    Instant::now() + self.settings.retry_interval
                }
            };

            self.state = SchedulerState::Sleeping {
                cycle: self.cycle,
                until,
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep_until(until) => {}
            }
        }

        self.save_unsupported(true);
        self.state = SchedulerState::Stopped;
        info!(cycles = self.cycle, "🛑 Scheduler stopped");
    }
}
