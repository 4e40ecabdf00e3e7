//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// URL list, pagination and run-mode settings
    #[serde(default)]
    pub run: RunConfig,

    /// Listing filter rules
    #[serde(default)]
    pub filter: FilterConfig,

    /// Fetch retry and block handling
    #[serde(default)]
    pub http: HttpConfig,

    /// Egress proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Session cookie source
    #[serde(default)]
    pub cookies: CookieConfig,

    /// Notification channels
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Result export
    #[serde(default)]
    pub export: ExportConfig,

    /// Dedup database
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Load configuration if the file exists. A file that fails to parse is an error.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(toml::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.run.urls.is_empty() {
            return Err(AppError::validation("run.urls is empty"));
        }
        if self.run.max_retries == 0 {
            return Err(AppError::validation("run.max_retries must be > 0"));
        }
        if self.filter.min_price > self.filter.max_price {
            return Err(AppError::validation(
                "filter.min_price must not exceed filter.max_price",
            ));
        }
        if self.http.block_threshold == 0 {
            return Err(AppError::validation("http.block_threshold must be > 0"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.proxy.proxy_change_url.is_some() && self.proxy.proxy_string.is_none() {
            return Err(AppError::validation(
                "proxy.proxy_change_url is set without proxy.proxy_string",
            ));
        }
        if !self.export.save_sheet && !self.export.save_json {
            return Err(AppError::validation("No result storage enabled"));
        }
        Ok(())
    }
}

/// URL iteration and run-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Search result pages to poll
    #[serde(default)]
    pub urls: Vec<String>,

    /// Pages to walk per URL
    #[serde(default = "defaults::count")]
    pub count: u32,

    /// Pause between whole runs
    #[serde(default = "defaults::pause_general")]
    pub pause_general_secs: u64,

    /// Pause between pages
    #[serde(default = "defaults::pause_between_links")]
    pub pause_between_links_secs: u64,

    /// Fetch attempts per page
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Single pass with a completion notice instead of per-listing notices
    #[serde(default)]
    pub one_time_start: bool,

    /// Fetch every surviving listing's page for view counters
    #[serde(default)]
    pub parse_views: bool,

    /// Site root used to build listing links
    #[serde(default = "defaults::base_url")]
    pub base_url: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            count: defaults::count(),
            pause_general_secs: defaults::pause_general(),
            pause_between_links_secs: defaults::pause_between_links(),
            max_retries: defaults::max_retries(),
            one_time_start: false,
            parse_views: false,
            base_url: defaults::base_url(),
        }
    }
}

impl RunConfig {
    pub fn pause_general(&self) -> Duration {
        Duration::from_secs(self.pause_general_secs)
    }

    pub fn pause_between_links(&self) -> Duration {
        Duration::from_secs(self.pause_between_links_secs)
    }
}

/// Listing filter rules, applied in a fixed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub min_price: i64,

    #[serde(default = "defaults::max_price")]
    pub max_price: i64,

    /// Keep only listings mentioning one of these phrases (empty: keep all)
    #[serde(default)]
    pub keywords_white: Vec<String>,

    /// Drop listings mentioning any of these phrases
    #[serde(default)]
    pub keywords_black: Vec<String>,

    /// Drop listings from these seller slugs
    #[serde(default)]
    pub seller_black: Vec<String>,

    /// Substring required in the listing address
    #[serde(default)]
    pub geo: Option<String>,

    /// Maximum listing age; 0 disables the check
    #[serde(default = "defaults::max_age")]
    pub max_age_secs: u64,

    #[serde(default = "defaults::enabled")]
    pub ignore_reserved: bool,

    #[serde(default)]
    pub ignore_promoted: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_price: 0,
            max_price: defaults::max_price(),
            keywords_white: Vec::new(),
            keywords_black: Vec::new(),
            seller_black: Vec::new(),
            geo: None,
            max_age_secs: defaults::max_age(),
            ignore_reserved: true,
            ignore_promoted: false,
        }
    }
}

/// Fetch behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for page requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Transient failures sleep `backoff_factor_secs * attempt`
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor_secs: f64,

    /// Sleep after a blocked response
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_secs: u64,

    /// Consecutive blocks tolerated before rotating identity
    #[serde(default = "defaults::block_threshold")]
    pub block_threshold: u32,

    /// Sleep used instead of rotation when there is no rotatable proxy
    #[serde(default = "defaults::no_proxy_block_pause")]
    pub no_proxy_block_pause_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            backoff_factor_secs: defaults::backoff_factor(),
            retry_delay_secs: defaults::retry_delay(),
            block_threshold: defaults::block_threshold(),
            no_proxy_block_pause_secs: defaults::no_proxy_block_pause(),
        }
    }
}

/// Proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// `user:pass@host:port` or `host:port`
    #[serde(default)]
    pub proxy_string: Option<String>,

    /// Provider link that rotates the mobile proxy IP
    #[serde(default)]
    pub proxy_change_url: Option<String>,

    #[serde(default = "defaults::change_ip_attempts")]
    pub change_ip_attempts: u32,

    #[serde(default = "defaults::change_ip_delay")]
    pub change_ip_delay_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_string: None,
            proxy_change_url: None,
            change_ip_attempts: defaults::change_ip_attempts(),
            change_ip_delay_secs: defaults::change_ip_delay(),
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Key for the cookie purchase service; enables purchased cookies
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "defaults::cookies_api_url")]
    pub api_url: String,

    /// Cookies kept from successful responses
    #[serde(default = "defaults::local_cookies_path")]
    pub local_path: PathBuf,

    /// Purchased cookie identity
    #[serde(default = "defaults::external_cookies_path")]
    pub external_path: PathBuf,

    #[serde(default = "defaults::unblock_timeout")]
    pub unblock_timeout_secs: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: defaults::cookies_api_url(),
            local_path: defaults::local_cookies_path(),
            external_path: defaults::external_cookies_path(),
            unblock_timeout_secs: defaults::unblock_timeout(),
        }
    }
}

/// Notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub tg_token: Option<String>,

    #[serde(default)]
    pub tg_chat_ids: Vec<String>,

    #[serde(default)]
    pub vk_token: Option<String>,

    #[serde(default)]
    pub vk_user_ids: Vec<String>,

    /// Delivery attempts per message
    #[serde(default = "defaults::notify_retries")]
    pub retries: u32,

    #[serde(default = "defaults::notify_delay")]
    pub delay_secs: f64,

    #[serde(default = "defaults::notify_backoff")]
    pub backoff: f64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            tg_token: None,
            tg_chat_ids: Vec::new(),
            vk_token: None,
            vk_user_ids: Vec::new(),
            retries: defaults::notify_retries(),
            delay_secs: defaults::notify_delay(),
            backoff: defaults::notify_backoff(),
        }
    }
}

/// Result export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,

    /// One result file per configured URL
    #[serde(default)]
    pub one_file_per_link: bool,

    /// CSV sheet (`.csv`) that spreadsheet tools open directly
    #[serde(default = "defaults::enabled", alias = "save_xlsx")]
    pub save_sheet: bool,

    #[serde(default)]
    pub save_json: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
            one_file_per_link: false,
            save_sheet: true,
            save_json: false,
        }
    }
}

/// Dedup database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn enabled() -> bool {
        true
    }

    // Run defaults
    pub fn count() -> u32 {
        1
    }
    pub fn pause_general() -> u64 {
        60
    }
    pub fn pause_between_links() -> u64 {
        5
    }
    pub fn max_retries() -> u32 {
        5
    }
    pub fn base_url() -> String {
        "https://www.avito.ru".into()
    }

    // Filter defaults
    pub fn max_price() -> i64 {
        999_999_999
    }
    pub fn max_age() -> u64 {
        24 * 60 * 60
    }

    // Http defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/144.0.0.0 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        20
    }
    pub fn backoff_factor() -> f64 {
        1.0
    }
    pub fn retry_delay() -> u64 {
        5
    }
    pub fn block_threshold() -> u32 {
        3
    }
    pub fn no_proxy_block_pause() -> u64 {
        300
    }

    // Proxy defaults
    pub fn change_ip_attempts() -> u32 {
        5
    }
    pub fn change_ip_delay() -> u64 {
        5
    }

    // Cookie defaults
    pub fn cookies_api_url() -> String {
        "https://spfa.ru/api".into()
    }
    pub fn local_cookies_path() -> PathBuf {
        PathBuf::from("storage/cookies.json")
    }
    pub fn external_cookies_path() -> PathBuf {
        PathBuf::from("storage/cookies_external.json")
    }
    pub fn unblock_timeout() -> u64 {
        300
    }

    // Notify defaults
    pub fn notify_retries() -> u32 {
        5
    }
    pub fn notify_delay() -> f64 {
        2.0
    }
    pub fn notify_backoff() -> f64 {
        1.5
    }

    // Export and storage defaults
    pub fn output_dir() -> PathBuf {
        PathBuf::from("result")
    }
    pub fn database_path() -> PathBuf {
        PathBuf::from("database.db")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
