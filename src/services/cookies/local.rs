//! Cookies carried over from our own successful responses.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::services::cookies::CookieProvider;
use crate::services::transport::{CookieMap, PageResponse};
use crate::utils::fs;

/// Session cookies persisted between runs.
#[derive(Debug, Clone)]
pub struct LocalSessionCookies {
    path: PathBuf,
    cookies: CookieMap,
}

impl LocalSessionCookies {
    /// Load previously saved cookies; a missing or unreadable file starts empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cookies = match fs::load_json::<CookieMap>(&path).await {
            Ok(Some(cookies)) => {
                log::info!("Loaded {} saved cookies from {}", cookies.len(), path.display());
                cookies
            }
            Ok(None) => CookieMap::new(),
            Err(e) => {
                log::warn!("Could not read cookies from {}: {}", path.display(), e);
                CookieMap::new()
            }
        };
        Self { path, cookies }
    }

    pub fn cookies(&self) -> &CookieMap {
        &self.cookies
    }
}

#[async_trait]
impl CookieProvider for LocalSessionCookies {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&mut self) -> Result<CookieMap> {
        Ok(self.cookies.clone())
    }

    async fn update(&mut self, response: &PageResponse) -> Result<()> {
        let before = self.cookies.clone();
        self.cookies.extend(response.cookies.clone());
        if self.cookies != before || !self.path.exists() {
            fs::save_json(&self.path, &self.cookies).await?;
        }
        Ok(())
    }

    async fn handle_block(&mut self) -> Result<()> {
        log::warn!("Dropping {} local cookies after block", self.cookies.len());
        self.cookies.clear();
        fs::save_json(&self.path, &self.cookies).await
    }
}
