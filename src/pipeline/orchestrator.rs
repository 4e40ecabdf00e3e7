// src/pipeline/orchestrator.rs

//! One pass over every configured search URL.
//!
//! ```text
//! for url in urls:
//!     for page in 1..=count:
//!         wait if paused / stop if cancelled
//!         fetch → extract → annotate → (empty? next url)
//!         filter → notify → views → dedup record → accumulate
//!         next page (p+1), pause between links
//!     export accumulated ads
//! completion message (single-pass mode)
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::{AppError, Result};
use crate::models::{Ad, Config, DedupKey};
use crate::notify::{NotificationDispatcher, build_notifier};
use crate::pipeline::control::{RunControl, RunState};
use crate::pipeline::filter::AdFilterPipeline;
use crate::services::{
    AdExtractor, CatalogExtractor, FetchError, HttpFetcher, ProxyPolicy, RequestStats,
    ReqwestTransport, build_cookie_provider, extract_views,
};
use crate::storage::{DedupStore, ResultExporter};
use crate::utils::log as run_log;
use crate::utils::url::next_page_url;

/// Text of the single-pass completion message.
pub const COMPLETION_MESSAGE: &str = "Парсинг завершён. Все ссылки обработаны";

/// Why a run ended early.
#[derive(Error, Debug)]
pub enum RunError {
    /// A fetch ran out of retries; the whole run should start over
    #[error("fetch retries exhausted: {0}")]
    RetriesExhausted(FetchError),

    /// The run cannot proceed at all
    #[error(transparent)]
    Fatal(#[from] AppError),
}

/// Counters for one run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub urls: usize,
    pub pages: usize,
    pub extracted: usize,
    pub kept: usize,
    pub notified: usize,
    pub exported: usize,
    pub requests: RequestStats,
    pub cancelled: bool,
}

enum PageOutcome {
    Continue,
    EndOfUrl,
    Cancelled,
}

/// Drives fetching, filtering and delivery for every URL.
pub struct Orchestrator {
    config: Arc<Config>,
    fetcher: HttpFetcher,
    extractor: Box<dyn AdExtractor>,
    filter: AdFilterPipeline,
    dedup: DedupStore,
    exporter: ResultExporter,
    notifier: NotificationDispatcher,
    control: RunControl,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        fetcher: HttpFetcher,
        extractor: Box<dyn AdExtractor>,
        dedup: DedupStore,
        notifier: NotificationDispatcher,
        control: RunControl,
    ) -> Self {
        let filter = AdFilterPipeline::new(config.filter.clone());
        let exporter = ResultExporter::new(config.export.clone(), config.run.base_url.clone());
        Self {
            config,
            fetcher,
            extractor,
            filter,
            dedup,
            exporter,
            notifier,
            control,
        }
    }

    /// Wire the default transport, cookies, proxy, store and channels.
    pub async fn from_config(config: Arc<Config>, control: RunControl) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.http));
        let cookies = build_cookie_provider(&config.cookies).await?;
        let proxy = ProxyPolicy::from_config(&config.proxy)?;
        let fetcher = HttpFetcher::new(transport, cookies, proxy, &config.http);
        let dedup = DedupStore::open(&config.storage.database_path).await?;
        let notifier = build_notifier(&config.notify, &config.run.base_url)?;

        Ok(Self::new(
            config,
            fetcher,
            Box::new(CatalogExtractor),
            dedup,
            notifier,
            control,
        ))
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    /// Process every URL once.
    pub async fn run(&mut self) -> std::result::Result<RunReport, RunError> {
        self.control.set_state(RunState::Running);
        let result = self.run_urls().await;
        self.control.set_state(RunState::Idle);
        result
    }

    async fn run_urls(&mut self) -> std::result::Result<RunReport, RunError> {
        let config = Arc::clone(&self.config);
        let urls = &config.run.urls;
        let mut report = RunReport {
            urls: urls.len(),
            ..RunReport::default()
        };

        run_log::header(&format!("Run started: {} URLs", urls.len()));

        for (index, url) in urls.iter().enumerate() {
            run_log::step(index + 1, urls.len(), url);
            self.exporter.storage_for(Some(url))?;

            let mut accumulated = Vec::new();
            let outcome = self.run_url(url, &mut accumulated, &mut report).await;
            self.export(url, &accumulated, &mut report).await;

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    report.requests = self.fetcher.stats();
                    return Err(e);
                }
            }
        }

        report.requests = self.fetcher.stats();
        run_log::summary(
            "Run",
            &[
                ("Pages", report.pages.to_string()),
                ("Extracted", report.extracted.to_string()),
                ("Kept", report.kept.to_string()),
                ("Exported", report.exported.to_string()),
                ("Good requests", report.requests.good.to_string()),
                ("Bad requests", report.requests.bad.to_string()),
            ],
        );

        if report.cancelled {
            log::info!("Run cancelled");
        } else if self.config.run.one_time_start && !self.notifier.is_empty() {
            self.notifier.notify_message(COMPLETION_MESSAGE).await;
        }
        Ok(report)
    }

    /// Page through one URL. `Ok(false)` means the run was cancelled.
    async fn run_url(
        &mut self,
        url: &str,
        accumulated: &mut Vec<Ad>,
        report: &mut RunReport,
    ) -> std::result::Result<bool, RunError> {
        let mut page_url = url.to_string();

        for page in 1..=self.config.run.count {
            if !self.control.wait_if_paused().await {
                return Ok(false);
            }
            log::info!("Page {} of {}: {}", page, self.config.run.count, page_url);

            match self.run_page(&page_url, accumulated, report).await? {
                PageOutcome::Continue => {}
                PageOutcome::EndOfUrl => break,
                PageOutcome::Cancelled => return Ok(false),
            }

            page_url = match next_page_url(&page_url) {
                Ok(next) => next,
                Err(e) => {
                    log::warn!("Cannot build next page URL from {}: {}", page_url, e);
                    break;
                }
            };

            let pause = self.config.run.pause_between_links();
            if !pause.is_zero() {
                log::info!("Pause {}s", pause.as_secs());
            }
            if !self.control.sleep(pause).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn run_page(
        &mut self,
        page_url: &str,
        accumulated: &mut Vec<Ad>,
        report: &mut RunReport,
    ) -> std::result::Result<PageOutcome, RunError> {
        let run = &self.config.run;
        let body = match self
            .fetcher
            .fetch(
                page_url,
                run.max_retries,
                self.config.http.backoff_factor_secs,
                self.control.token(),
            )
            .await
        {
            Ok(body) => body,
            Err(FetchError::Cancelled) => return Ok(PageOutcome::Cancelled),
            Err(e @ FetchError::Rejected { .. }) => {
                log::warn!("Stopping this URL: {}", e);
                return Ok(PageOutcome::EndOfUrl);
            }
            Err(e @ FetchError::Exhausted { .. }) => {
                log::error!("{}", e);
                return Err(RunError::RetriesExhausted(e));
            }
        };
        report.pages += 1;

        let mut ads = match self.extractor.extract(&body) {
            Ok(ads) => ads,
            Err(e) => {
                log::error!("Skipping page, extraction failed: {}", e);
                return Ok(PageOutcome::Continue);
            }
        };
        for ad in &mut ads {
            ad.annotate_seller();
            ad.annotate_promotion();
        }
        if ads.is_empty() {
            log::info!("No more ads, done with this URL");
            return Ok(PageOutcome::EndOfUrl);
        }
        report.extracted += ads.len();

        let keys: Vec<DedupKey> = ads.iter().filter_map(Ad::dedup_key).collect();
        let seen = self.dedup.seen_among(&keys).await;
        let check = |id: i64, price: i64| match &seen {
            Ok(seen) => Ok(seen.contains(&DedupKey { id, price })),
            Err(e) => Err(AppError::validation(format!("dedup store unavailable: {e}"))),
        };
        let mut kept = self.filter.apply(ads, &check);
        report.kept += kept.len();

        if !kept.is_empty() && !run.one_time_start && !self.notifier.is_empty() {
            let delivery = self.notifier.notify_many(&kept).await;
            report.notified += delivery.attempted - delivery.failed;
        }

        if run.parse_views && !kept.is_empty() && !self.parse_views(&mut kept).await {
            return Ok(PageOutcome::Cancelled);
        }

        let kept_keys: Vec<DedupKey> = kept.iter().filter_map(Ad::dedup_key).collect();
        if let Err(e) = self.dedup.add_records(&kept_keys).await {
            log::error!("Could not record seen ads: {}", e);
        }
        accumulated.extend(kept);
        Ok(PageOutcome::Continue)
    }

    /// Fetch each listing page for view counters. Returns `false` if cancelled.
    async fn parse_views(&mut self, ads: &mut [Ad]) -> bool {
        log::info!("Fetching views for {} ads", ads.len());
        let base_url = self.config.run.base_url.clone();
        let max_retries = self.config.run.max_retries;
        let backoff = self.config.http.backoff_factor_secs;

        for ad in ads.iter_mut() {
            let url = ad.link(&base_url);
            match self
                .fetcher
                .fetch(&url, max_retries, backoff, self.control.token())
                .await
            {
                Ok(body) => match extract_views(&body) {
                    Ok((total, today)) => {
                        ad.total_views = total;
                        ad.today_views = today;
                    }
                    Err(e) => log::warn!("Views not found on {}: {}", url, e),
                },
                Err(FetchError::Cancelled) => return false,
                Err(e) => log::warn!("Views fetch failed for {}: {}", url, e),
            }
            let jitter = Duration::from_secs_f64(0.1 + fastrand::f64() * 0.8);
            if !self.control.sleep(jitter).await {
                return false;
            }
        }
        true
    }

    async fn export(&mut self, url: &str, ads: &[Ad], report: &mut RunReport) {
        if ads.is_empty() {
            log::info!("Nothing to save");
            return;
        }
        match self.exporter.save(Some(url), ads).await {
            Ok(()) => report.exported += ads.len(),
            Err(e) => log::error!("Export failed: {}", e),
        }
    }
}
