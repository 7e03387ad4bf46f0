//! Oracle module - Multi-source price aggregation
//!
//! Queries ten public price APIs per ticker, guarded by per-domain rate
//! limiting, a short-TTL quote cache and a registry of unsupported pairs,
//! and reduces the results to one averaged price.

mod aggregator;
mod cache;
mod rate_limit;
pub mod sources;
mod unsupported;

pub use aggregator::{AggregatorSettings, PriceAggregator};
pub use cache::QuoteCache;
pub use rate_limit::RateLimiter;
pub use sources::{build_sources, HttpFetcher, PriceSource};
pub use unsupported::UnsupportedPairs;
