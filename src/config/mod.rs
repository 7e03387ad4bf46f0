//! Configuration management for PriceBot
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::oracle::AggregatorSettings;
use crate::scheduler::SchedulerSettings;
use crate::types::{ChannelRequest, SourceId, Ticker};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub fetch: FetchConfig,
    pub sources: SourcesConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    pub display: DisplayConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycle starts
    pub update_interval_secs: u64,
    /// Seconds to wait after a failed cycle
    pub retry_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// How long a quote stays cached
    pub cache_secs: u64,
    /// Back-off when a 429 has no usable Retry-After
    pub default_backoff_secs: u64,
    /// How long an unsupported pair is skipped before retrying
    pub unsupported_recheck_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Config keys of the sources to query
    pub enabled: Vec<String>,
    /// Permanently skipped pairs, source key -> tickers
    #[serde(default)]
    pub blacklist: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub tickers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Include per-source lines in single-ticker messages
    pub show_individual_sources: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Enable the daily CSV price log
    pub csv_enabled: bool,
    /// Enable price_history.json
    pub history_enabled: bool,
    /// Keep unsupported pairs in unsupported_pairs.json across restarts
    pub unsupported_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig {
        channel_id: "@crypto_prices".to_string(),
        tickers: vec!["BTC".to_string(), "ETH".to_string()],
    }]
}

impl AppConfig {
    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let all_sources: Vec<&str> = SourceId::ALL.iter().map(|s| s.config_key()).collect();

        let builder = Config::builder()
            // Scheduler defaults
            .set_default("scheduler.update_interval_secs", 120)?
            .set_default("scheduler.retry_interval_secs", 60)?
            // Fetch defaults
            .set_default("fetch.timeout_ms", 10_000)?
            .set_default("fetch.cache_secs", 60)?
            .set_default("fetch.default_backoff_secs", 60)?
            .set_default("fetch.unsupported_recheck_secs", 6 * 60 * 60)?
            .set_default(
                "fetch.user_agent",
                concat!("pricebot/", env!("CARGO_PKG_VERSION")),
            )?
            // Sources defaults
            .set_default("sources.enabled", all_sources)?
            .set_default("sources.blacklist.binance", vec!["XMR"])?
            // Display defaults
            .set_default("display.show_individual_sources", true)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            .set_default("persistence.history_enabled", true)?
            .set_default("persistence.unsupported_enabled", true)?
            // Logging defaults
            .set_default("logging.json", false)?;

        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEBOT__*)
            .add_source(Environment::with_prefix("PRICEBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        Self::finish(config)
    }

    /// Defaults overlaid with an inline TOML document
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?;

        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self> {
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.update_interval_secs == 0 {
            bail!("scheduler.update_interval_secs must be greater than zero");
        }
        if self.scheduler.retry_interval_secs == 0 {
            bail!("scheduler.retry_interval_secs must be greater than zero");
        }
        if self.fetch.timeout_ms == 0 {
            bail!("fetch.timeout_ms must be greater than zero");
        }
        if self.enabled_sources()?.is_empty() {
            bail!("sources.enabled must name at least one source");
        }
        self.blacklist()?;
        self.channel_requests()?;
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.update_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.retry_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.fetch.cache_secs)
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            fetch_timeout: self.fetch_timeout(),
            default_backoff: Duration::from_secs(self.fetch.default_backoff_secs),
            unsupported_recheck: Duration::from_secs(self.fetch.unsupported_recheck_secs),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            update_interval: self.update_interval(),
            retry_interval: self.retry_interval(),
        }
    }

    /// Enabled sources, deduplicated, in configured order
    pub fn enabled_sources(&self) -> Result<Vec<SourceId>> {
        let mut ids = Vec::with_capacity(self.sources.enabled.len());
        for key in &self.sources.enabled {
            let id: SourceId = key
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid sources.enabled entry")?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn blacklist(&self) -> Result<Vec<(SourceId, Ticker)>> {
        let mut pairs = Vec::new();
        for (key, tickers) in &self.sources.blacklist {
            let id: SourceId = key
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid sources.blacklist key")?;
            for raw in tickers {
                let ticker = Ticker::parse(raw)
                    .with_context(|| format!("Invalid blacklisted ticker {:?} for {}", raw, key))?;
                pairs.push((id, ticker));
            }
        }
        Ok(pairs)
    }

    pub fn channel_requests(&self) -> Result<Vec<ChannelRequest>> {
        if self.channels.is_empty() {
            bail!("At least one channel must be configured");
        }
        self.channels
            .iter()
            .map(|channel| -> Result<ChannelRequest> {
                if channel.channel_id.trim().is_empty() {
                    bail!("Channel with empty channel_id");
                }
                if channel.tickers.is_empty() {
                    bail!("Channel {} has no tickers", channel.channel_id);
                }
                let tickers = channel
                    .tickers
                    .iter()
                    .map(|raw| {
                        Ticker::parse(raw).with_context(|| {
                            format!("Invalid ticker {:?} in channel {}", raw, channel.channel_id)
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ChannelRequest {
                    channel_id: channel.channel_id.clone(),
                    tickers,
                })
            })
            .collect()
    }

    /// One-line summary for the startup log
    pub fn digest(&self) -> String {
        format!(
            "interval={}s retry={}s timeout={}ms cache={}s sources={} channels={} data_dir={}",
            self.scheduler.update_interval_secs,
            self.scheduler.retry_interval_secs,
            self.fetch.timeout_ms,
            self.fetch.cache_secs,
            self.sources.enabled.join(","),
            self.channels.len(),
            self.persistence.data_dir
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
