// src/models/mod.rs

//! Domain models for the watcher.
//!
//! Listing data and configuration structures shared by the fetch layer,
//! the filter pipeline and the delivery side.

mod ad;
mod config;

// Re-export all public types
pub use ad::{Ad, Coords, DedupKey, PROMOTED_MARKER, PromotionStep};
pub use config::{
    Config, CookieConfig, ExportConfig, FilterConfig, HttpConfig, LoggingConfig, NotifyConfig,
    ProxyConfig, RunConfig, StorageConfig,
};
