//! Persistence Module
//!
//! Price history (last aggregated price per ticker, JSON) used to keep the
//! change indicator meaningful across restarts, the unsupported-pair
//! registry, and a daily CSV log of every published price.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::oracle::UnsupportedPairs;
use crate::types::{AggregatedPrice, SourceId, Ticker};

const HISTORY_FILE: &str = "price_history.json";
const UNSUPPORTED_FILE: &str = "unsupported_pairs.json";
/// Minimum spacing between unsupported-pair saves
const UNSUPPORTED_SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Write pretty JSON atomically via a temp file in the same directory
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// One row of the CSV price log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp: i64,
    pub ticker: String,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub source_count: usize,
    /// Contributing sources joined with `|`
    pub sources: String,
}

impl From<&AggregatedPrice> for PriceRecord {
    fn from(price: &AggregatedPrice) -> Self {
        Self {
            timestamp: price.computed_at.timestamp_millis(),
            ticker: price.ticker.to_string(),
            price: price.price,
            change_24h: price.change_24h,
            volume_24h: price.volume_24h,
            source_count: price.source_count(),
            sources: price
                .sources()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join("|"),
        }
    }
}

/// Last aggregated price per ticker, stored as `{ "BTC": 65000.1 }`
#[derive(Debug, Clone)]
pub struct PriceHistory {
    path: PathBuf,
    prices: BTreeMap<String, f64>,
}

impl PriceHistory {
    /// Load from `<data_dir>/price_history.json`. A missing or unreadable
    /// file yields an empty history.
    pub fn load(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join(HISTORY_FILE);
        let prices = match Self::read(&path) {
            Ok(prices) => {
                info!(path = %path.display(), tickers = prices.len(), "📂 Loaded price history");
                prices
            }
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "Failed to load price history, starting empty");
                } else {
                    debug!(path = %path.display(), "No price history yet");
                }
                BTreeMap::new()
            }
        };
        Self { path, prices }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, f64>> {
        let raw = fs::read_to_string(path).context("Failed to read price history")?;
        let prices: BTreeMap<String, f64> =
            serde_json::from_str(&raw).context("Failed to parse price history")?;
        Ok(prices)
    }

    pub fn get(&self, ticker: &Ticker) -> Option<f64> {
        self.prices.get(ticker.as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn update(&mut self, price: &AggregatedPrice) {
        self.prices.insert(price.ticker.to_string(), price.price);
    }

    /// Entries usable to seed the aggregator. Keys that no longer parse as
    /// tickers are dropped.
    pub fn entries(&self) -> Vec<(Ticker, f64)> {
        self.prices
            .iter()
            .filter_map(|(k, v)| Ticker::parse(k).map(|t| (t, *v)))
            .collect()
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.prices).context("Failed to save price history")
    }
}

/// Saved form: source key -> ticker -> recheck deadline (wall clock)
type UnsupportedFile = BTreeMap<String, BTreeMap<String, DateTime<Utc>>>;

/// `<data_dir>/unsupported_pairs.json`, so known-unsupported pairs are not
/// probed again after a restart. Only expiring marks are stored; the
/// blacklist is re-applied from config.
#[derive(Debug)]
pub struct UnsupportedPairsStore {
    path: PathBuf,
    last_saved: Option<Instant>,
}

impl UnsupportedPairsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(UNSUPPORTED_FILE),
            last_saved: None,
        }
    }

    /// Restore saved marks whose deadline is still ahead. A missing or
    /// unreadable file restores nothing. Returns how many were restored.
    pub fn load_into(&self, registry: &UnsupportedPairs) -> usize {
        let saved = match self.read() {
            Ok(saved) => saved,
            Err(e) => {
                if self.path.exists() {
                    warn!(path = %self.path.display(), error = %e, "Failed to load unsupported pairs, starting empty");
                } else {
                    debug!(path = %self.path.display(), "No unsupported pairs saved yet");
                }
                return 0;
            }
        };

        let now = Utc::now();
        let mut restored = 0;
        for (key, tickers) in &saved {
            let Ok(source) = key.parse::<SourceId>() else {
                warn!(source = %key, "Ignoring unsupported pairs for unknown source");
                continue;
            };
            for (raw, recheck_at) in tickers {
                let Some(ticker) = Ticker::parse(raw) else {
                    continue;
                };
                if let Ok(remaining) = (*recheck_at - now).to_std() {
                    registry.restore(source, &ticker, remaining);
                    restored += 1;
                }
            }
        }
        info!(path = %self.path.display(), pairs = restored, "📂 Loaded unsupported pairs");
        restored
    }

    fn read(&self) -> Result<UnsupportedFile> {
        let raw = fs::read_to_string(&self.path).context("Failed to read unsupported pairs")?;
        serde_json::from_str(&raw).context("Failed to parse unsupported pairs")
    }

    /// Save unless the last save was less than a minute ago
    pub fn save_if_due(&mut self, registry: &UnsupportedPairs) -> Result<bool> {
        if self
            .last_saved
            .is_some_and(|at| at.elapsed() < UNSUPPORTED_SAVE_INTERVAL)
        {
            debug!("Skipping unsupported pairs save");
            return Ok(false);
        }
        self.save(registry)?;
        Ok(true)
    }

    pub fn save(&mut self, registry: &UnsupportedPairs) -> Result<()> {
        let now = Utc::now();
        let mut file = UnsupportedFile::new();
        for (source, ticker, remaining) in registry.marked() {
            let remaining = chrono::Duration::from_std(remaining)
                .context("Recheck deadline out of range")?;
            file.entry(source.config_key().to_string())
                .or_default()
                .insert(ticker.to_string(), now + remaining);
        }
        write_json_atomic(&self.path, &file).context("Failed to save unsupported pairs")?;
        self.last_saved = Some(Instant::now());
        debug!(path = %self.path.display(), sources = file.len(), "Saved unsupported pairs");
        Ok(())
    }
}

struct DailyWriter {
    date: NaiveDate,
    writer: csv::Writer<fs::File>,
}

/// Append-only CSV log, one file per UTC day under `<data_dir>/prices/`
pub struct CsvPriceLog {
    dir: PathBuf,
    current: AsyncRwLock<Option<DailyWriter>>,
}

impl CsvPriceLog {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("prices");
        fs::create_dir_all(&dir).context("Failed to create prices directory")?;
        Ok(Self {
            dir,
            current: AsyncRwLock::new(None),
        })
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("prices_{}.csv", date.format("%Y-%m-%d")))
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    /// Append one row per price, rolling over to a new file at midnight UTC
    pub async fn append(&self, prices: &[AggregatedPrice]) -> Result<()> {
        if prices.is_empty() {
            return Ok(());
        }
        let today = Utc::now().date_naive();
        let mut current = self.current.write().await;

        let needs_new = current.as_ref().map_or(true, |w| w.date != today);
        if needs_new {
            let path = self.file_for(today);
            debug!(path = %path.display(), "Opening price log");
            *current = Some(DailyWriter {
                date: today,
                writer: Self::create_writer(&path)?,
            });
        }

        let Some(daily) = current.as_mut() else {
            return Ok(());
        };
        for price in prices {
            daily
                .writer
                .serialize(PriceRecord::from(price))
                .context("Failed to write price record")?;
        }
        daily.writer.flush().context("Failed to flush price writer")?;
        Ok(())
    }
}
