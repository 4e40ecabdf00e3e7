//! Session cookie providers.
//!
//! - `LocalSessionCookies`: cookies collected from our own successful responses
//! - `PurchasedCookies`: cookies bought from an external unblocking service

mod external;
mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::CookieConfig;
use crate::services::transport::{CookieMap, PageResponse};

pub use external::{CookieApi, HttpCookieApi, PurchasedCookies, PurchasedIdentity, UnblockStatus};
pub use local::LocalSessionCookies;

/// Source of session cookies with a block/unblock lifecycle.
#[async_trait]
pub trait CookieProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Cookies to send with the next request.
    async fn get(&mut self) -> Result<CookieMap>;

    /// Take note of a successful response.
    async fn update(&mut self, _response: &PageResponse) -> Result<()> {
        Ok(())
    }

    /// React to a confirmed block.
    async fn handle_block(&mut self) -> Result<()>;
}

/// Build the provider selected by configuration.
///
/// An API key selects purchased cookies; otherwise the local session is used.
pub async fn build_cookie_provider(config: &CookieConfig) -> Result<Box<dyn CookieProvider>> {
    match &config.api_key {
        Some(api_key) if !api_key.trim().is_empty() => {
            let api = HttpCookieApi::new(&config.api_url, api_key)?;
            let provider = PurchasedCookies::load(
                Box::new(api),
                &config.external_path,
                std::time::Duration::from_secs(config.unblock_timeout_secs),
            )
            .await;
            Ok(Box::new(provider))
        }
        _ => Ok(Box::new(LocalSessionCookies::load(&config.local_path).await)),
    }
}
