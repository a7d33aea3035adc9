use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::Row;
use tracing::{info, trace};

use super::{Result, RuleStore, ScanPage, StoreError};
use crate::rule::Rule;

/// SQLite-backed store.
///
/// Rules are kept as JSON documents keyed by domain; certificate and account
/// data as raw blobs. Both tables survive restarts, so certificates issued
/// once are reused instead of being ordered again.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and its tables.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Unavailable(format!("creating {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(db_error)?;

        let store = Self { pool };
        store.create_tables().await?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS redirects (
                domain TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn decode_rule(data: &str) -> Result<Rule> {
    serde_json::from_str(data).map_err(|e| StoreError::InvalidData(e.to_string()))
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn get_rule(&self, domain: &str) -> Result<Option<Rule>> {
        let row = sqlx::query("SELECT data FROM redirects WHERE domain = ?1")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data").map_err(db_error)?;
                decode_rule(&data).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn scan_page(&self, after: Option<&str>, limit: usize) -> Result<ScanPage> {
        // One extra row tells whether another page exists.
        let fetch = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT data FROM redirects
            WHERE ?1 IS NULL OR domain > ?1
            ORDER BY domain
            LIMIT ?2
            "#,
        )
        .bind(after)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut rules = rows
            .iter()
            .map(|row| {
                let data: String = row.try_get("data").map_err(db_error)?;
                decode_rule(&data)
            })
            .collect::<Result<Vec<_>>>()?;

        let last_key = if rules.len() > limit {
            rules.truncate(limit);
            rules.last().map(|rule| rule.from.clone())
        } else {
            None
        };

        trace!(after = ?after, count = rules.len(), more = last_key.is_some(), "Scanned rule page");
        Ok(ScanPage { rules, last_key })
    }

    async fn put_rule(&self, rule: Rule) -> Result<()> {
        let data =
            serde_json::to_string(&rule).map_err(|e| StoreError::InvalidData(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO redirects (domain, data)
            VALUES (?1, ?2)
            ON CONFLICT(domain) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(rule.from.as_str())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_rule(&self, domain: &str) -> Result<()> {
        sqlx::query("DELETE FROM redirects WHERE domain = ?1")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT data FROM blobs WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|row| row.try_get::<Vec<u8>, _>("data").map_err(db_error))
            .transpose()
    }

    async fn put_blob(&self, key: &str, data: Vec<u8>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blobs (key, data)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(key)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM blobs WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
