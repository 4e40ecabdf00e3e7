// src/storage/dedup.rs

//! Persistent set of already-seen `(id, price)` pairs.

use std::collections::HashSet;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::DedupKey;
use crate::utils::fs;

/// SQLite-backed dedup store.
///
/// Each record is one row keyed by the composite `(id, price)`; a price change
/// on the same id is a new key.
#[derive(Debug, Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::ensure_parent(path).await?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS viewed (
                id INTEGER NOT NULL,
                price INTEGER NOT NULL,
                PRIMARY KEY (id, price)
            )
            ",
        )
        .execute(&pool)
        .await?;

        log::info!("Dedup store ready at {}", path.display());
        Ok(Self { pool })
    }

    pub async fn record_exists(&self, id: i64, price: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM viewed WHERE id = ? AND price = ?")
            .bind(id)
            .bind(price)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn add_record(&self, id: i64, price: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO viewed (id, price) VALUES (?, ?)")
            .bind(id)
            .bind(price)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record several keys in one transaction.
    pub async fn add_records(&self, keys: &[DedupKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("INSERT OR IGNORE INTO viewed (id, price) VALUES (?, ?)")
                .bind(key.id)
                .bind(key.price)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// The subset of `keys` already recorded.
    pub async fn seen_among(&self, keys: &[DedupKey]) -> Result<HashSet<DedupKey>> {
        let mut seen = HashSet::new();
        for key in keys {
            if self.record_exists(key.id, key.price).await? {
                seen.insert(*key);
            }
        }
        Ok(seen)
    }

    /// Number of recorded keys.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM viewed")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> DedupStore {
        DedupStore::open(tmp.path().join("db/database.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_exact_pair_semantics() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        assert!(!store.record_exists(42, 300).await.unwrap());
        store.add_record(42, 300).await.unwrap();
        assert!(store.record_exists(42, 300).await.unwrap());
        assert!(!store.record_exists(42, 250).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;

        store.add_record(1, 10).await.unwrap();
        store.add_record(1, 10).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_and_seen_among() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let a = DedupKey { id: 1, price: 10 };
        let b = DedupKey { id: 2, price: 20 };
        let c = DedupKey { id: 1, price: 11 };

        store.add_records(&[a, b]).await.unwrap();
        let seen = store.seen_among(&[a, b, c]).await.unwrap();

        assert!(seen.contains(&a) && seen.contains(&b));
        assert!(!seen.contains(&c));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = store(&tmp).await;
            store.add_record(7, 70).await.unwrap();
            store.close().await;
        }
        let reopened = store(&tmp).await;
        assert!(reopened.record_exists(7, 70).await.unwrap());
    }
}
