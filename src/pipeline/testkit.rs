//! Scripted collaborators for orchestrator and scheduler tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::{AppError, Result};
use crate::models::{Ad, Config};
use crate::notify::{NotificationDispatcher, Notifier};
use crate::pipeline::control::RunControl;
use crate::pipeline::orchestrator::Orchestrator;
use crate::services::cookies::LocalSessionCookies;
use crate::services::{
    AdExtractor, CookieMap, HttpFetcher, PageRequest, PageResponse, PageTransport, ProxyPolicy,
};
use crate::storage::DedupStore;

/// One scripted search page: a status and the ads extraction yields.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    status: u16,
    ads: Option<Vec<Ad>>,
}

impl ScriptedPage {
    pub fn ok(ads: Vec<Ad>) -> Self {
        Self {
            status: 200,
            ads: Some(ads),
        }
    }

    /// A page whose payload cannot be extracted.
    pub fn broken() -> Self {
        Self {
            status: 200,
            ads: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self { status, ads: None }
    }
}

/// Answers requests in script order; the last page repeats.
struct ScriptTransport {
    pages: Arc<Vec<ScriptedPage>>,
    requested: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PageTransport for ScriptTransport {
    async fn get(&self, request: PageRequest<'_>) -> Result<PageResponse> {
        let index = {
            let mut requested = self.requested.lock().unwrap();
            requested.push(request.url.to_string());
            (requested.len() - 1).min(self.pages.len().saturating_sub(1))
        };
        let status = self.pages.get(index).map_or(404, |p| p.status);
        Ok(PageResponse {
            status,
            body: format!("page:{index}"),
            cookies: CookieMap::new(),
        })
    }
}

struct ScriptExtractor {
    pages: Arc<Vec<ScriptedPage>>,
}

impl AdExtractor for ScriptExtractor {
    fn extract(&self, payload: &str) -> Result<Vec<Ad>> {
        payload
            .strip_prefix("page:")
            .and_then(|i| i.parse::<usize>().ok())
            .and_then(|i| self.pages.get(i))
            .and_then(|page| page.ads.clone())
            .ok_or_else(|| AppError::extract("scripted page has no catalog"))
    }
}

struct RecordingChannel {
    messages: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Notifier for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify_ad(&self, ad: &Ad) -> Result<()> {
        self.messages.lock().unwrap().push(format!("ad:{}", ad.id));
        Ok(())
    }

    async fn notify_message(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Temp workspace plus a quiet config.
pub struct Harness {
    _dir: TempDir,
    config: Arc<Config>,
    requested: Arc<Mutex<Vec<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
    control: RunControl,
}

impl Harness {
    pub fn new(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.run.urls = vec!["https://www.avito.ru/moskva/mebel?q=divan".to_string()];
        config.run.pause_between_links_secs = 0;
        config.run.pause_general_secs = 0;
        config.filter.max_age_secs = 0;
        config.http.retry_delay_secs = 0;
        config.http.backoff_factor_secs = 0.0;
        config.http.no_proxy_block_pause_secs = 0;
        config.export.output_dir = dir.path().join("result");
        config.storage.database_path = dir.path().join("database.db");
        config.cookies.local_path = dir.path().join("cookies.json");
        customize(&mut config);

        Self {
            _dir: dir,
            config: Arc::new(config),
            requested: Arc::new(Mutex::new(Vec::new())),
            messages: Arc::new(Mutex::new(Vec::new())),
            control: RunControl::new(),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub async fn orchestrator(&self, pages: Vec<ScriptedPage>) -> Orchestrator {
        let pages = Arc::new(pages);
        let transport = Arc::new(ScriptTransport {
            pages: Arc::clone(&pages),
            requested: Arc::clone(&self.requested),
        });
        let cookies = LocalSessionCookies::load(&self.config.cookies.local_path).await;
        let fetcher = HttpFetcher::new(
            transport,
            Box::new(cookies),
            ProxyPolicy::None,
            &self.config.http,
        );
        let notifier = NotificationDispatcher::new(vec![Box::new(RecordingChannel {
            messages: Arc::clone(&self.messages),
        })]);

        Orchestrator::new(
            self.config(),
            fetcher,
            Box::new(ScriptExtractor { pages }),
            self.dedup().await,
            notifier,
            self.control(),
        )
    }

    pub async fn dedup(&self) -> DedupStore {
        DedupStore::open(&self.config.storage.database_path)
            .await
            .unwrap()
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    /// Free-form messages delivered so far (ads excluded).
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.starts_with("ad:"))
            .cloned()
            .collect()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.export.output_dir.clone()
    }
}
