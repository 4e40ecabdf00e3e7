//! Tabular result sheet (CSV, opens in spreadsheet tools).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Ad;
use crate::storage::export::ResultStorage;
use crate::utils::fs;

/// Column headers, in row order.
pub const HEADERS: [&str; 13] = [
    "Название",
    "Цена",
    "URL",
    "Описание",
    "Дата публикации",
    "Продавец",
    "Адрес",
    "Адрес пользователя",
    "Координаты",
    "Изображения",
    "Поднято",
    "Просмотры (всего)",
    "Просмотры (сегодня)",
];

/// Prefix text cells that a spreadsheet would evaluate as a formula.
pub fn neutralize_formula(value: &str) -> String {
    if value.starts_with(['=', '+', '-', '@']) {
        format!("'{value}")
    } else {
        value.to_string()
    }
}

fn publish_time(ms: Option<i64>) -> String {
    ms.and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn opt_number<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// One sheet row for `ad`.
pub fn row(ad: &Ad, base_url: &str) -> Vec<String> {
    let coords = ad.coords.as_ref();
    let lat_lng = coords
        .and_then(|c| Some(format!("{};{}", c.lat?, c.lng?)))
        .unwrap_or_default();
    let address_user = coords
        .and_then(|c| c.address_user.clone())
        .unwrap_or_default();

    vec![
        neutralize_formula(&ad.title),
        opt_number(ad.price),
        neutralize_formula(&ad.link(base_url)),
        neutralize_formula(&ad.description),
        publish_time(ad.published_at_ms),
        neutralize_formula(ad.seller_id.as_deref().unwrap_or_default()),
        neutralize_formula(ad.location_name.as_deref().unwrap_or_default()),
        neutralize_formula(&address_user),
        neutralize_formula(&lat_lng),
        neutralize_formula(&ad.images.join(";")),
        if ad.is_promoted { "Да" } else { "Нет" }.to_string(),
        opt_number(ad.total_views),
        opt_number(ad.today_views),
    ]
}

/// Appends one row per listing to a CSV sheet, writing the header on first use.
pub struct SheetStorage {
    path: PathBuf,
    base_url: String,
    lock: Mutex<()>,
}

impl SheetStorage {
    pub fn new(path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            base_url: base_url.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(&self, ads: &[Ad], with_header: bool) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if with_header {
            writer.write_record(HEADERS)?;
        }
        for ad in ads {
            writer.write_record(row(ad, &self.base_url))?;
        }
        writer
            .into_inner()
            .map_err(|e| AppError::export(format!("flush sheet rows: {e}")))
    }
}

#[async_trait]
impl ResultStorage for SheetStorage {
    fn name(&self) -> &'static str {
        "sheet"
    }

    async fn save(&self, ads: &[Ad]) -> Result<()> {
        if ads.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;

        let needs_header = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        let bytes = self.encode(ads, needs_header)?;
        fs::ensure_parent(&self.path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;

        log::info!("[sheet] {} rows appended to {}", ads.len(), self.path.display());
        Ok(())
    }
}
