//! PriceBot Library
//!
//! Multi-source cryptocurrency price aggregation with per-domain rate
//! limiting, quote caching and a periodic update scheduler.

pub mod config;
pub mod error;
pub mod oracle;
pub mod persistence;
pub mod report;
pub mod scheduler;
pub mod types;
