//! Result export.
//!
//! A [`NamingStrategy`] picks the file stem for a URL; every enabled
//! [`ResultStorage`] writes under that stem with its own extension.
//!
//! ```text
//! result/
//! ├── result.csv                    # single file
//! └── www.avito.ru_3f2a9c01de.csv   # per link
//! ```

mod json;
mod naming;
mod sheet;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Ad, ExportConfig};

pub use json::JsonStorage;
pub use naming::{NamingStrategy, SINGLE_FILE_STEM, with_suffix};
pub use sheet::{HEADERS, SheetStorage, neutralize_formula};

/// A durable destination for surviving listings.
#[async_trait]
pub trait ResultStorage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn save(&self, ads: &[Ad]) -> Result<()>;
}

/// Fans out to several storages; one failing storage does not stop the rest.
pub struct CompositeResultStorage {
    storages: Vec<Box<dyn ResultStorage>>,
}

impl CompositeResultStorage {
    pub fn new(storages: Vec<Box<dyn ResultStorage>>) -> Result<Self> {
        if storages.is_empty() {
            return Err(AppError::config("no result storage enabled"));
        }
        Ok(Self { storages })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.storages.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl ResultStorage for CompositeResultStorage {
    fn name(&self) -> &'static str {
        "composite"
    }

    /// Save to every storage; returns an error only when all of them failed.
    async fn save(&self, ads: &[Ad]) -> Result<()> {
        if ads.is_empty() {
            return Ok(());
        }
        let mut failures = 0;
        for storage in &self.storages {
            if let Err(e) = storage.save(ads).await {
                failures += 1;
                log::warn!("[export] {} storage failed: {}", storage.name(), e);
            }
        }
        if failures == self.storages.len() {
            return Err(AppError::export("every result storage failed"));
        }
        Ok(())
    }
}

/// Build the storages for one URL's results.
pub fn build_result_storage(
    config: &ExportConfig,
    base_url: &str,
    url: Option<&str>,
) -> Result<CompositeResultStorage> {
    let stem = NamingStrategy::from_config(config).storage_key(url)?;

    let mut storages: Vec<Box<dyn ResultStorage>> = Vec::new();
    if config.save_sheet {
        storages.push(Box::new(SheetStorage::new(with_suffix(&stem, "csv"), base_url)));
    }
    if config.save_json {
        storages.push(Box::new(JsonStorage::new(with_suffix(&stem, "json"))));
    }
    CompositeResultStorage::new(storages)
}

/// Routes each URL's results to its storage, one storage per output stem.
///
/// URLs that share a stem (single-file naming) share the storage and its lock.
pub struct ResultExporter {
    config: ExportConfig,
    base_url: String,
    naming: NamingStrategy,
    storages: HashMap<PathBuf, CompositeResultStorage>,
}

impl ResultExporter {
    pub fn new(config: ExportConfig, base_url: impl Into<String>) -> Self {
        let naming = NamingStrategy::from_config(&config);
        Self {
            config,
            base_url: base_url.into(),
            naming,
            storages: HashMap::new(),
        }
    }

    /// Storage for `url`, built on first use.
    pub fn storage_for(&mut self, url: Option<&str>) -> Result<&CompositeResultStorage> {
        let stem = self.naming.storage_key(url)?;
        if !self.storages.contains_key(&stem) {
            let storage = build_result_storage(&self.config, &self.base_url, url)?;
            log::debug!("[export] {} -> {:?}", stem.display(), storage.names());
            self.storages.insert(stem.clone(), storage);
        }
        self.storages
            .get(&stem)
            .ok_or_else(|| AppError::export(format!("no storage for {}", stem.display())))
    }

    pub async fn save(&mut self, url: Option<&str>, ads: &[Ad]) -> Result<()> {
        self.storage_for(url)?.save(ads).await
    }

    /// Distinct output stems opened so far.
    pub fn storage_count(&self) -> usize {
        self.storages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Failing;

    #[async_trait]
    impl ResultStorage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn save(&self, _ads: &[Ad]) -> Result<()> {
            Err(AppError::export("disk full"))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ResultStorage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn save(&self, ads: &[Ad]) -> Result<()> {
            self.0.fetch_add(ads.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_storage_does_not_block_others() {
        let saved = Arc::new(AtomicUsize::new(0));
        let composite = CompositeResultStorage::new(vec![
            Box::new(Failing),
            Box::new(Counting(saved.clone())),
        ])
        .unwrap();

        composite.save(&[Ad::default()]).await.unwrap();
        assert_eq!(saved.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failing_is_error() {
        let composite = CompositeResultStorage::new(vec![Box::new(Failing)]).unwrap();
        assert!(composite.save(&[Ad::default()]).await.is_err());
    }

    #[test]
    fn test_build_requires_a_storage() {
        let config = ExportConfig {
            save_sheet: false,
            save_json: false,
            ..ExportConfig::default()
        };
        assert!(build_result_storage(&config, "https://www.avito.ru", None).is_err());
    }

    #[tokio::test]
    async fn test_build_writes_under_stem() {
        let tmp = TempDir::new().unwrap();
        let config = ExportConfig {
            output_dir: tmp.path().to_path_buf(),
            save_json: true,
            ..ExportConfig::default()
        };
        let storage = build_result_storage(&config, "https://www.avito.ru", None).unwrap();
        assert_eq!(storage.names(), vec!["sheet", "json"]);

        let ad = Ad {
            id: 1,
            price: Some(10),
            ..Ad::default()
        };
        storage.save(&[ad]).await.unwrap();
        assert!(tmp.path().join("result.csv").exists());
        assert!(tmp.path().join("result.json").exists());
    }

    #[tokio::test]
    async fn test_single_file_urls_share_one_storage() {
        let tmp = TempDir::new().unwrap();
        let config = ExportConfig {
            output_dir: tmp.path().to_path_buf(),
            ..ExportConfig::default()
        };
        let mut exporter = ResultExporter::new(config, "https://www.avito.ru");
        let ad = |id| Ad {
            id,
            price: Some(10),
            ..Ad::default()
        };

        exporter.save(Some("https://www.avito.ru/moskva?q=a"), &[ad(1)]).await.unwrap();
        exporter.save(Some("https://www.avito.ru/moskva?q=b"), &[ad(2)]).await.unwrap();

        assert_eq!(exporter.storage_count(), 1);
        let sheet = std::fs::read_to_string(tmp.path().join("result.csv")).unwrap();
        assert_eq!(sheet.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_per_link_urls_get_own_storage() {
        let tmp = TempDir::new().unwrap();
        let config = ExportConfig {
            output_dir: tmp.path().to_path_buf(),
            one_file_per_link: true,
            ..ExportConfig::default()
        };
        let mut exporter = ResultExporter::new(config, "https://www.avito.ru");

        exporter.storage_for(Some("https://www.avito.ru/moskva?q=a")).unwrap();
        exporter.storage_for(Some("https://www.avito.ru/moskva?q=b")).unwrap();
        exporter.storage_for(Some("https://www.avito.ru/moskva?q=a")).unwrap();

        assert_eq!(exporter.storage_count(), 2);
    }
}
