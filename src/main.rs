//! PriceBot - periodic multi-source crypto price updates

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pricebot::config::AppConfig;
use pricebot::oracle::{
    build_sources, HttpFetcher, PriceAggregator, QuoteCache, RateLimiter, UnsupportedPairs,
};
use pricebot::persistence::{CsvPriceLog, PriceHistory, UnsupportedPairsStore};
use pricebot::report::LogSink;
use pricebot::scheduler::Scheduler;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "pricebot=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(config.logging.json);

    info!("🚀 Starting PriceBot v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %config, "Configuration loaded");

    let http = HttpFetcher::new(config.fetch_timeout(), &config.fetch.user_agent)?;
    let sources = build_sources(&http, &config.enabled_sources()?)?;
    info!(sources = sources.len(), "Price sources ready");

    let unsupported = Arc::new(UnsupportedPairs::new());
    let unsupported_store = config
        .persistence
        .unsupported_enabled
        .then(|| UnsupportedPairsStore::new(&config.persistence.data_dir));
    if let Some(store) = &unsupported_store {
        store.load_into(&unsupported);
    }
    for (source, ticker) in config.blacklist()? {
        unsupported.blacklist(source, &ticker);
        info!(source = %source, ticker = %ticker, "Blacklisted pair");
    }

    let aggregator = Arc::new(PriceAggregator::new(
        sources,
        Arc::new(RateLimiter::new()),
        Arc::new(QuoteCache::new(config.cache_ttl())),
        unsupported,
        config.aggregator_settings(),
    ));

    let channels = config.channel_requests()?;
    let sink = Arc::new(LogSink::new(
        channels.clone(),
        config.display.show_individual_sources,
    ));

    let mut scheduler = Scheduler::new(aggregator, sink, &channels, config.scheduler_settings());
    if config.persistence.history_enabled {
        scheduler = scheduler.with_history(PriceHistory::load(&config.persistence.data_dir));
    }
    if config.persistence.csv_enabled {
        let log = CsvPriceLog::new(&config.persistence.data_dir)
            .context("Failed to initialize price log")?;
        scheduler = scheduler.with_price_log(log);
    }
    if let Some(store) = unsupported_store {
        scheduler = scheduler.with_unsupported_store(store);
    }

    let tickers: Vec<&str> = scheduler.tickers().iter().map(|t| t.as_str()).collect();
    info!(
        channels = channels.len(),
        tickers = %tickers.join(","),
        "✅ Scheduler ready"
    );

    scheduler.run_until(shutdown_signal()).await;
    info!("👋 PriceBot stopped");
    Ok(())
}
