//! Durable storage for cache entries.
//!
//! One row per entry in `cache_entries`, the payload in `cache_payloads`, and
//! a single `cache_stats` row. Entry and payload rows are written in one
//! transaction so a crash never leaves metadata without its payload.

use crate::error::{CacheError, Result};
use crate::metadata::{CacheEntryMetadata, CacheEntryType};
use crate::stats::CacheStats;
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// Storage backend for the cache store.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Create tables if needed.
    async fn initialize(&self) -> Result<()>;

    async fn load_entries(&self) -> Result<Vec<CacheEntryMetadata>>;

    async fn load_stats(&self) -> Result<Option<CacheStats>>;

    /// Returns `Ok(None)` if no payload row exists.
    async fn read_payload(&self, key: &str) -> Result<Option<Bytes>>;

    /// Insert or replace an entry together with its payload.
    async fn write_entry(&self, entry: &CacheEntryMetadata, payload: &[u8]) -> Result<()>;

    /// Persist access bookkeeping for an existing entry.
    async fn touch_entry(&self, key: &str, last_accessed: i64, access_count: u64) -> Result<()>;

    async fn delete_entries(&self, keys: &[String]) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn save_stats(&self, stats: &CacheStats) -> Result<()>;
}

fn storage_error(e: sqlx::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

/// SQLite implementation of [`CacheRepository`].
pub struct SqliteCacheRepository {
    pool: SqlitePool,
}

impl SqliteCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheRepository for SqliteCacheRepository {
    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<()> {
        debug!("Initializing cache repository");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY NOT NULL,
                entry_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                expires_at INTEGER NOT NULL,
                priority INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_entries_eviction
            ON cache_entries(priority ASC, last_accessed ASC, created_at ASC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cache_payloads (
                key TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cache_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_size INTEGER NOT NULL,
                total_items INTEGER NOT NULL,
                last_cleanup INTEGER,
                hit_count INTEGER NOT NULL,
                miss_count INTEGER NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        }

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<CacheEntryMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT key, entry_type, size, created_at, last_accessed,
                   access_count, expires_at, priority
            FROM cache_entries
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter()
            .map(|row| {
                Ok(CacheEntryMetadata {
                    key: row.get("key"),
                    entry_type: row.get::<String, _>("entry_type").parse::<CacheEntryType>()?,
                    size: row.get::<i64, _>("size") as u64,
                    created_at: row.get("created_at"),
                    last_accessed: row.get("last_accessed"),
                    access_count: row.get::<i64, _>("access_count") as u64,
                    expires_at: row.get("expires_at"),
                    priority: row.get::<i64, _>("priority") as u8,
                })
            })
            .collect()
    }

    async fn load_stats(&self) -> Result<Option<CacheStats>> {
        let row = sqlx::query(
            r#"
            SELECT total_size, total_items, last_cleanup, hit_count, miss_count
            FROM cache_stats
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(|row| CacheStats {
            total_size: row.get::<i64, _>("total_size") as u64,
            total_items: row.get::<i64, _>("total_items") as u64,
            last_cleanup: row.get("last_cleanup"),
            hit_count: row.get::<i64, _>("hit_count") as u64,
            miss_count: row.get::<i64, _>("miss_count") as u64,
        }))
    }

    async fn read_payload(&self, key: &str) -> Result<Option<Bytes>> {
        let data: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT data FROM cache_payloads WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

        Ok(data.map(Bytes::from))
    }

    async fn write_entry(&self, entry: &CacheEntryMetadata, payload: &[u8]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (
                key, entry_type, size, created_at, last_accessed,
                access_count, expires_at, priority
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.key)
        .bind(entry.entry_type.as_str())
        .bind(entry.size as i64)
        .bind(entry.created_at)
        .bind(entry.last_accessed)
        .bind(entry.access_count as i64)
        .bind(entry.expires_at)
        .bind(entry.priority as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query("INSERT OR REPLACE INTO cache_payloads (key, data) VALUES (?, ?)")
            .bind(&entry.key)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn touch_entry(&self, key: &str, last_accessed: i64, access_count: u64) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET last_accessed = ?, access_count = ? WHERE key = ?")
            .bind(last_accessed)
            .bind(access_count as i64)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(())
    }

    async fn delete_entries(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        for key in keys {
            sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;

            sqlx::query("DELETE FROM cache_payloads WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query("DELETE FROM cache_entries")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        sqlx::query("DELETE FROM cache_payloads")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn save_stats(&self, stats: &CacheStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_stats (id, total_size, total_items, last_cleanup, hit_count, miss_count)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_size = excluded.total_size,
                total_items = excluded.total_items,
                last_cleanup = excluded.last_cleanup,
                hit_count = excluded.hit_count,
                miss_count = excluded.miss_count
            "#,
        )
        .bind(stats.total_size as i64)
        .bind(stats.total_items as i64)
        .bind(stats.last_cleanup)
        .bind(stats.hit_count as i64)
        .bind(stats.miss_count as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}
