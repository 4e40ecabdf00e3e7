//! Service layer for the watcher.
//!
//! This module contains the network-facing pieces of a run:
//! - Raw page transport (`PageTransport`, `ReqwestTransport`)
//! - Session cookies (`CookieProvider`)
//! - Egress proxy (`ProxyPolicy`)
//! - Retrying page fetcher (`HttpFetcher`)
//! - Listing extraction (`AdExtractor`, `CatalogExtractor`)

pub mod cookies;
mod extract;
mod fetcher;
mod proxy;
mod transport;

pub use cookies::{CookieProvider, build_cookie_provider};
pub use extract::{AdExtractor, CatalogExtractor, extract_views};
pub use fetcher::{BLOCK_STATUSES, FetchError, HttpFetcher, RequestStats};
pub use proxy::{MobileProxy, ProxyPolicy, RotationOutcome};
pub use transport::{CookieMap, PageRequest, PageResponse, PageTransport, ReqwestTransport, cookie_header};
