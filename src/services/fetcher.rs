// src/services/fetcher.rs

//! Page fetching with retry, backoff and block detection.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::HttpConfig;
use crate::services::cookies::CookieProvider;
use crate::services::proxy::{ProxyPolicy, RotationOutcome};
use crate::services::transport::{CookieMap, PageRequest, PageTransport};
use crate::utils::secs_f64;

/// Statuses that mean the site wants a different identity.
pub const BLOCK_STATUSES: [u16; 4] = [401, 403, 429, 302];

/// Why a fetch gave up.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Every attempt failed with a transient error or a block
    #[error("{url}: gave up after {attempts} attempts (last: {last})")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    /// The site answered with a status that retrying will not fix
    #[error("{url}: rejected with status {status}")]
    Rejected { url: String, status: u16 },

    /// The run was cancelled before the next attempt
    #[error("fetch cancelled")]
    Cancelled,
}

/// Good and bad request counters for the run report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestStats {
    pub good: u64,
    pub bad: u64,
}

/// Fetches pages through a transport, rotating cookies and proxy on blocks.
pub struct HttpFetcher {
    transport: Arc<dyn PageTransport>,
    cookies: Box<dyn CookieProvider>,
    proxy: ProxyPolicy,
    retry_delay: Duration,
    block_threshold: u32,
    no_proxy_pause: Duration,
    block_count: u32,
    stats: RequestStats,
}

impl HttpFetcher {
    pub fn new(
        transport: Arc<dyn PageTransport>,
        cookies: Box<dyn CookieProvider>,
        proxy: ProxyPolicy,
        config: &HttpConfig,
    ) -> Self {
        log::info!(
            "Fetcher ready | cookies={} | proxy={}",
            cookies.name(),
            if proxy.endpoint().is_some() { "on" } else { "off" }
        );
        Self {
            transport,
            cookies,
            proxy,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            block_threshold: config.block_threshold.max(1),
            no_proxy_pause: Duration::from_secs(config.no_proxy_block_pause_secs),
            block_count: 0,
            stats: RequestStats::default(),
        }
    }

    /// Consecutive blocks seen since the last success or rotation.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn stats(&self) -> RequestStats {
        self.stats
    }

    /// Fetch `url`, making at most `max_retries` attempts.
    ///
    /// Cancellation is checked before every attempt and interrupts waits.
    pub async fn fetch(
        &mut self,
        url: &str,
        max_retries: u32,
        backoff_factor: f64,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let mut last = String::from("no attempt made");

        for attempt in 1..=max_retries {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let cookies = match self.cookies.get().await {
                Ok(cookies) => cookies,
                Err(e) => {
                    log::warn!("[fetch] cookies unavailable, going without: {}", e);
                    CookieMap::new()
                }
            };
            let request = PageRequest {
                url,
                proxy: self.proxy.endpoint(),
                cookies: &cookies,
            };

            log::debug!("[fetch] attempt {}/{} {}", attempt, max_retries, url);
            let response = match self.transport.get(request).await {
                Ok(response) => response,
                Err(e) => {
                    self.stats.bad += 1;
                    log::warn!("[fetch] attempt {} failed: {}", attempt, e);
                    last = e.to_string();
                    if attempt < max_retries {
                        self.wait(backoff(backoff_factor, attempt), cancel).await?;
                    }
                    continue;
                }
            };

            let status = response.status;
            if response.is_success() {
                self.stats.good += 1;
                self.block_count = 0;
                if let Err(e) = self.cookies.update(&response).await {
                    log::warn!("[fetch] could not store cookies: {}", e);
                }
                return Ok(response.body);
            }

            if status >= 500 {
                self.stats.bad += 1;
                log::warn!("[fetch] server error {} on attempt {}", status, attempt);
                last = format!("status {status}");
                if attempt < max_retries {
                    self.wait(backoff(backoff_factor, attempt), cancel).await?;
                }
                continue;
            }

            if BLOCK_STATUSES.contains(&status) {
                self.stats.bad += 1;
                self.block_count += 1;
                log::warn!(
                    "[fetch] blocked with {} ({}/{})",
                    status,
                    self.block_count,
                    self.block_threshold
                );
                last = format!("blocked with status {status}");
                if self.block_count >= self.block_threshold {
                    self.rotate(cancel).await?;
                }
                if attempt < max_retries {
                    self.wait(self.retry_delay, cancel).await?;
                }
                continue;
            }

            log::warn!("[fetch] {} answered {}, not retrying", url, status);
            return Err(FetchError::Rejected {
                url: url.to_string(),
                status,
            });
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_retries,
            last,
        })
    }

    async fn rotate(&mut self, cancel: &CancellationToken) -> Result<(), FetchError> {
        log::warn!("[fetch] block threshold reached, rotating identity");
        if let Err(e) = self.cookies.handle_block().await {
            log::error!("[fetch] cookie provider could not handle block: {}", e);
        }
        if self.proxy.handle_block().await == RotationOutcome::NoProxy {
            log::warn!(
                "[fetch] no proxy to rotate, waiting {}s",
                self.no_proxy_pause.as_secs()
            );
            self.wait(self.no_proxy_pause, cancel).await?;
        }
        self.block_count = 0;
        Ok(())
    }

    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), FetchError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn backoff(factor: f64, attempt: u32) -> Duration {
    secs_f64(factor * f64::from(attempt))
}
