//! Cookies purchased from an external unblocking service.
//!
//! ## Block handling
//!
//! ```text
//! no identity ───────────────────────────────► purchase
//! unblock in flight, younger than timeout ───► wait
//! unblock in flight, timed out ──────────────► forget marker, ask again
//! ask to unblock:
//!   200/202  accepted      → mark in flight
//!   409      in progress   → keep/mark in flight
//!   503      unavailable   → wait
//!   410/403/404/other      → abandon identity → purchase
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::cookies::CookieProvider;
use crate::services::transport::CookieMap;
use crate::utils::fs;

/// A purchased cookie set and the service-side id used to unblock it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasedIdentity {
    pub id: String,
    pub cookies: CookieMap,
}

/// Answer of the unblock endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnblockStatus {
    /// 200 / 202: unblock task accepted
    Accepted,
    /// 409: unblock already running
    InProgress,
    /// 410: too late to unblock this identity
    Expired,
    /// 403: bad key or no rights
    Forbidden,
    /// 404: identity unknown to the service
    NotFound,
    /// 503: service temporarily down
    Unavailable,
    Other(u16),
}

impl UnblockStatus {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 | 202 => Self::Accepted,
            409 => Self::InProgress,
            410 => Self::Expired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            503 => Self::Unavailable,
            other => Self::Other(other),
        }
    }
}

/// Remote cookie service.
#[async_trait]
pub trait CookieApi: Send + Sync {
    /// Buy a fresh cookie identity.
    async fn purchase(&self) -> Result<PurchasedIdentity>;

    /// Ask the service to unblock an identity.
    async fn unblock(&self, id: &str) -> Result<UnblockStatus>;
}

#[derive(Deserialize)]
struct PurchaseResponse {
    #[serde(default)]
    results: Option<PurchasePayload>,
}

#[derive(Deserialize)]
struct PurchasePayload {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    cookies: Option<CookieMap>,
}

/// HTTP/JSON client for the cookie service.
pub struct HttpCookieApi {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpCookieApi {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CookieApi for HttpCookieApi {
    async fn purchase(&self) -> Result<PurchasedIdentity> {
        log::info!("Requesting a new cookie purchase");
        let response = self
            .client
            .post(format!("{}/cookies/", self.api_url))
            .json(&serde_json::json!({ "api_key": self.api_key }))
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            401 => log::error!("Cookie service: API key missing"),
            403 => log::error!("Cookie service: access denied (bad key or no funds)"),
            503 => log::warn!("Cookie service temporarily unavailable"),
            _ => {}
        }
        if !response.status().is_success() {
            return Err(AppError::status("cookie purchase", status));
        }

        let body: PurchaseResponse = response.json().await?;
        let payload = body
            .results
            .ok_or_else(|| AppError::cookies("purchase response without results"))?;

        let id = match payload.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(AppError::cookies("purchase response without id")),
        };
        let cookies = payload
            .cookies
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::cookies("purchase response without cookies"))?;

        Ok(PurchasedIdentity { id, cookies })
    }

    async fn unblock(&self, id: &str) -> Result<UnblockStatus> {
        let response = self
            .client
            .post(format!("{}/unblock/", self.api_url))
            .json(&serde_json::json!({ "id": id, "api_key": self.api_key }))
            .send()
            .await?;
        Ok(UnblockStatus::from_status(response.status().as_u16()))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    id: String,
    cookies: CookieMap,
    saved_at: i64,
}

/// Provider backed by purchased cookies.
pub struct PurchasedCookies {
    api: Box<dyn CookieApi>,
    path: PathBuf,
    identity: Option<PurchasedIdentity>,
    unblock_started: Option<Instant>,
    unblock_timeout: Duration,
}

impl PurchasedCookies {
    /// Restore the last purchased identity from disk, if any.
    pub async fn load(api: Box<dyn CookieApi>, path: impl AsRef<Path>, unblock_timeout: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let identity = match fs::load_json::<StoredIdentity>(&path).await {
            Ok(Some(stored)) if !stored.id.is_empty() && !stored.cookies.is_empty() => {
                log::info!("Loaded purchased cookies from disk | id={}", stored.id);
                Some(PurchasedIdentity {
                    id: stored.id,
                    cookies: stored.cookies,
                })
            }
            Ok(Some(_)) => {
                log::warn!("Cookie file has no id or cookies: {}", path.display());
                None
            }
            Ok(None) => {
                log::info!("No saved purchased cookies");
                None
            }
            Err(e) => {
                log::warn!("Could not load purchased cookies: {}", e);
                None
            }
        };

        Self {
            api,
            path,
            identity,
            unblock_started: None,
            unblock_timeout,
        }
    }

    pub fn identity(&self) -> Option<&PurchasedIdentity> {
        self.identity.as_ref()
    }

    pub fn unblock_in_flight(&self) -> bool {
        self.unblock_started.is_some()
    }

    async fn purchase(&mut self) -> Result<CookieMap> {
        let identity = self.api.purchase().await?;
        log::info!("Purchased cookies | id={}", identity.id);

        let stored = StoredIdentity {
            id: identity.id.clone(),
            cookies: identity.cookies.clone(),
            saved_at: Utc::now().timestamp(),
        };
        if let Err(e) = fs::save_json(&self.path, &stored).await {
            log::warn!("Could not save purchased cookies: {}", e);
        }

        let cookies = identity.cookies.clone();
        self.identity = Some(identity);
        self.unblock_started = None;
        Ok(cookies)
    }
}

#[async_trait]
impl CookieProvider for PurchasedCookies {
    fn name(&self) -> &'static str {
        "purchased"
    }

    async fn get(&mut self) -> Result<CookieMap> {
        match &self.identity {
            Some(identity) => Ok(identity.cookies.clone()),
            None => self.purchase().await,
        }
    }

    async fn handle_block(&mut self) -> Result<()> {
        let Some(id) = self.identity.as_ref().map(|i| i.id.clone()) else {
            log::warn!("No cookie id; purchasing new cookies");
            self.purchase().await?;
            return Ok(());
        };

        if let Some(started) = self.unblock_started {
            let elapsed = started.elapsed();
            if elapsed < self.unblock_timeout {
                log::info!(
                    "Waiting for unblock | id={} | elapsed={}s",
                    id,
                    elapsed.as_secs()
                );
                return Ok(());
            }
            log::warn!("Unblock timed out | id={}", id);
            self.unblock_started = None;
        }

        log::info!("Requesting unblock | id={}", id);
        let status = match self.api.unblock(&id).await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Unblock request failed | id={} | {}", id, e);
                self.purchase().await?;
                return Ok(());
            }
        };

        match status {
            UnblockStatus::Accepted => {
                self.unblock_started = Some(Instant::now());
                log::info!("Unblock started | id={}", id);
                return Ok(());
            }
            UnblockStatus::InProgress => {
                self.unblock_started.get_or_insert_with(Instant::now);
                log::info!("Unblock already running | id={}", id);
                return Ok(());
            }
            UnblockStatus::Unavailable => {
                log::warn!("Unblock service unavailable, will retry later");
                return Ok(());
            }
            UnblockStatus::Expired => log::info!("Unblock window expired | id={}", id),
            UnblockStatus::Forbidden => log::error!("Unblock denied: bad API key or no rights"),
            UnblockStatus::NotFound => log::warn!("Cookies unknown to the service | id={}", id),
            UnblockStatus::Other(code) => {
                log::error!("Unexpected unblock answer | id={} | status={}", id, code)
            }
        }

        log::warn!("Abandoning cookies id={}; purchasing new ones", id);
        self.identity = None;
        self.unblock_started = None;
        self.purchase().await?;
        Ok(())
    }
}
