//! Result file naming.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::ExportConfig;

/// File stem used by the single-file strategy.
pub const SINGLE_FILE_STEM: &str = "result";

/// Decides where the results of one URL go.
///
/// Keys are path stems; each storage appends its own extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingStrategy {
    /// Every URL shares one file
    SingleFile { path: PathBuf },
    /// One file per URL: `{base_dir}/{host}_{hash[:10]}`
    PerLink { base_dir: PathBuf },
}

impl NamingStrategy {
    pub fn from_config(config: &ExportConfig) -> Self {
        if config.one_file_per_link {
            Self::PerLink {
                base_dir: config.output_dir.clone(),
            }
        } else {
            Self::SingleFile {
                path: config.output_dir.join(SINGLE_FILE_STEM),
            }
        }
    }

    /// Storage key for `url`. Per-link naming needs the URL.
    pub fn storage_key(&self, url: Option<&str>) -> Result<PathBuf> {
        match self {
            Self::SingleFile { path } => Ok(path.clone()),
            Self::PerLink { base_dir } => {
                let url = url.ok_or_else(|| AppError::export("per-link naming needs a URL"))?;
                let parsed = Url::parse(url)?;
                let host = match (parsed.host_str(), parsed.port()) {
                    (Some(host), Some(port)) => format!("{host}_{port}"),
                    (Some(host), None) => host.to_string(),
                    (None, _) => "local".to_string(),
                };
                let digest = hex::encode(Sha256::digest(url.as_bytes()));
                Ok(base_dir.join(format!("{}_{}", host, &digest[..10])))
            }
        }
    }
}

/// `stem` plus `.ext`, keeping any dots already in the stem.
pub fn with_suffix(stem: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn per_link() -> NamingStrategy {
        NamingStrategy::PerLink {
            base_dir: PathBuf::from("result"),
        }
    }

    #[test]
    fn test_single_file_is_constant() {
        let naming = NamingStrategy::from_config(&ExportConfig::default());
        let a = naming.storage_key(Some("https://www.avito.ru/moskva?q=a")).unwrap();
        let b = naming.storage_key(None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("result").join("result"));
    }

    #[test]
    fn test_per_link_is_stable_and_distinct() {
        let naming = per_link();
        let a1 = naming.storage_key(Some("https://www.avito.ru/moskva?q=a")).unwrap();
        let a2 = naming.storage_key(Some("https://www.avito.ru/moskva?q=a")).unwrap();
        let b = naming.storage_key(Some("https://www.avito.ru/moskva?q=b")).unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        let name = a1.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("www.avito.ru_"));
        assert_eq!(name.len(), "www.avito.ru_".len() + 10);
    }

    #[test]
    fn test_per_link_requires_url() {
        assert!(per_link().storage_key(None).is_err());
    }

    #[test]
    fn test_with_suffix_keeps_dots() {
        assert_eq!(
            with_suffix(Path::new("result/www.avito.ru_0123456789"), "csv"),
            PathBuf::from("result/www.avito.ru_0123456789.csv")
        );
    }
}
