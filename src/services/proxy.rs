// src/services/proxy.rs

//! Egress proxy selection and rotation.

use std::time::Duration;

use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::ProxyConfig;
use crate::utils::pause;

/// What happened when the proxy was asked to rotate after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// No proxy configured; the caller waits the block out instead
    NoProxy,
    /// A fixed proxy cannot change its address
    NotRotatable,
    /// The provider confirmed an IP change
    Rotated,
    /// Every change-IP attempt failed
    Failed,
}

/// Mobile proxy with a provider link that changes the exit IP.
#[derive(Debug, Clone)]
pub struct MobileProxy {
    endpoint: String,
    change_ip_url: String,
    attempts: u32,
    delay: Duration,
    client: Client,
}

impl MobileProxy {
    pub fn new(
        endpoint: impl Into<String>,
        change_ip_url: impl Into<String>,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            change_ip_url: change_ip_url.into(),
            attempts: attempts.max(1),
            delay,
            client,
        })
    }

    /// Request an IP change, retrying a bounded number of times.
    async fn change_ip(&self) -> RotationOutcome {
        for attempt in 1..=self.attempts {
            log::info!("Changing proxy IP (attempt {}/{})", attempt, self.attempts);
            match self.client.get(&self.change_ip_url).send().await {
                Ok(response) if response.status().is_success() => {
                    log::info!("Proxy IP changed");
                    return RotationOutcome::Rotated;
                }
                Ok(response) => {
                    log::warn!("Change-IP link answered {}", response.status());
                }
                Err(e) => {
                    log::warn!("Change-IP request failed: {}", e);
                }
            }
            if attempt < self.attempts {
                pause(self.delay).await;
            }
        }
        log::error!("Could not change proxy IP after {} attempts", self.attempts);
        RotationOutcome::Failed
    }
}

/// Egress identity policy.
#[derive(Debug, Clone, Default)]
pub enum ProxyPolicy {
    /// Direct connection
    #[default]
    None,
    /// Fixed server proxy
    Server { endpoint: String },
    /// Rotating mobile proxy
    Mobile(MobileProxy),
}

fn proxy_url(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    }
}

impl ProxyPolicy {
    /// Pick the policy from configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        match (&config.proxy_string, &config.proxy_change_url) {
            (None, Some(_)) => Err(AppError::config(
                "proxy_change_url is set without proxy_string",
            )),
            (Some(proxy), Some(change_url)) => {
                log::info!("Proxy detected as mobile");
                Ok(Self::Mobile(MobileProxy::new(
                    proxy_url(proxy),
                    change_url.clone(),
                    config.change_ip_attempts,
                    Duration::from_secs(config.change_ip_delay_secs),
                )?))
            }
            (Some(proxy), None) => {
                log::info!("Proxy detected as server");
                Ok(Self::Server {
                    endpoint: proxy_url(proxy),
                })
            }
            (None, None) => {
                log::info!("Working without proxy");
                Ok(Self::None)
            }
        }
    }

    /// Proxy URL for the transport, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Server { endpoint } => Some(endpoint),
            Self::Mobile(mobile) => Some(&mobile.endpoint),
        }
    }

    /// React to a confirmed block.
    pub async fn handle_block(&self) -> RotationOutcome {
        match self {
            Self::None => RotationOutcome::NoProxy,
            Self::Server { .. } => RotationOutcome::NotRotatable,
            Self::Mobile(mobile) => mobile.change_ip().await,
        }
    }
}


/// Local stand-in for a provider's change-IP link.
#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every request with `status`. Returns the URL and a hit counter.
    pub(crate) async fn change_ip_endpoint(status: u16) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let reply = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/change"), hits)
    }
}
