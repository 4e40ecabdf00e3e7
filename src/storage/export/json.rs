//! JSON array result file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::Ad;
use crate::storage::export::ResultStorage;
use crate::utils::fs;

/// Keeps every saved listing in one JSON array, replaced atomically on save.
pub struct JsonStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultStorage for JsonStorage {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn save(&self, ads: &[Ad]) -> Result<()> {
        if ads.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;

        let mut entries = match fs::load_json::<Vec<serde_json::Value>>(&self.path).await {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("[json] {} unreadable, starting over: {}", self.path.display(), e);
                Vec::new()
            }
        };
        for ad in ads {
            entries.push(serde_json::to_value(ad)?);
        }
        fs::save_json(&self.path, &entries).await?;

        log::info!("[json] {} ads saved to {}", ads.len(), self.path.display());
        Ok(())
    }
}
