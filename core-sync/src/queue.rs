//! # Sync Queue
//!
//! Durable, ordered list of local mutations waiting for the remote store.
//!
//! ## Ordering
//!
//! Every row carries a `seq`; the head of the queue is the lowest `seq`. A
//! failed operation is moved to the tail together with every later operation
//! for the same entity, keeping their relative order, so a newer write can
//! never be applied before an older one it supersedes.
//!
//! ## Durability
//!
//! `enqueue` returns only after the row is committed. An operation leaves the
//! table only after a successful apply or a permanent drop.

use async_trait::async_trait;
use bridge_traits::time::Clock;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::operation::{SyncAction, SyncOperation, SyncOperationId, SyncOperationType};

/// Repository trait for persisting the sync queue
#[async_trait]
pub trait SyncQueueRepository: Send + Sync {
    /// Append an operation at the tail
    async fn append(&self, op: &SyncOperation) -> Result<()>;

    /// Up to `limit` operations from the head, in queue order
    async fn peek_batch(&self, limit: usize) -> Result<Vec<SyncOperation>>;

    /// Every queued operation, in queue order
    async fn load_all(&self) -> Result<Vec<SyncOperation>>;

    /// Delete an operation; returns false if it was not queued
    async fn remove(&self, id: SyncOperationId) -> Result<bool>;

    /// Persist the failure bookkeeping of `op` and move it, with every other
    /// operation for the same entity, to the tail in their current order
    async fn requeue_entity_tail(&self, op: &SyncOperation) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    async fn clear(&self) -> Result<u64>;
}

/// SQLite implementation of the sync queue repository
pub struct SqliteSyncQueueRepository {
    pool: SqlitePool,
}

impl SqliteSyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize database table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                op_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_attempt_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_queue_seq ON sync_queue(seq)")
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_queue_entity
            ON sync_queue(op_type, entity_id, seq)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

fn row_to_operation(row: &SqliteRow) -> Result<SyncOperation> {
    let payload: String = row.get("payload");

    Ok(SyncOperation {
        id: SyncOperationId::from_string(&row.get::<String, _>("id"))?,
        op_type: row.get::<String, _>("op_type").parse::<SyncOperationType>()?,
        entity_id: row.get("entity_id"),
        action: row.get::<String, _>("action").parse::<SyncAction>()?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| SyncError::InvalidPayload(e.to_string()))?,
        timestamp: row.get("created_at"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        last_error: row.get("last_error"),
        last_attempt_at: row.get("last_attempt_at"),
    })
}

#[async_trait]
impl SyncQueueRepository for SqliteSyncQueueRepository {
    async fn append(&self, op: &SyncOperation) -> Result<()> {
        let payload = serde_json::to_string(&op.payload)
            .map_err(|e| SyncError::InvalidPayload(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, seq, op_type, entity_id, action, payload,
                created_at, retry_count, last_error, last_attempt_at
            ) VALUES (
                ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue),
                ?, ?, ?, ?, ?, ?, ?, ?
            )
            "#,
        )
        .bind(op.id.as_str())
        .bind(op.op_type.as_str())
        .bind(&op.entity_id)
        .bind(op.action.as_str())
        .bind(payload)
        .bind(op.timestamp)
        .bind(op.retry_count as i64)
        .bind(&op.last_error)
        .bind(op.last_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn peek_batch(&self, limit: usize) -> Result<Vec<SyncOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, op_type, entity_id, action, payload, created_at,
                   retry_count, last_error, last_attempt_at
            FROM sync_queue
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.iter().map(row_to_operation).collect()
    }

    async fn load_all(&self) -> Result<Vec<SyncOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, op_type, entity_id, action, payload, created_at,
                   retry_count, last_error, last_attempt_at
            FROM sync_queue
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.iter().map(row_to_operation).collect()
    }

    async fn remove(&self, id: SyncOperationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue_entity_tail(&self, op: &SyncOperation) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE sync_queue SET
                retry_count = ?,
                last_error = ?,
                last_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(op.retry_count as i64)
        .bind(&op.last_error)
        .bind(op.last_attempt_at)
        .bind(op.id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM sync_queue WHERE op_type = ? AND entity_id = ? ORDER BY seq ASC",
        )
        .bind(op.op_type.as_str())
        .bind(&op.entity_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let tail: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM sync_queue")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        for (offset, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE sync_queue SET seq = ? WHERE id = ?")
                .bind(tail + offset as i64 + 1)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Moved to the tail for another attempt
    Requeued,
    /// Retries exhausted; removed from the queue
    Dropped,
}

/// Durable queue of pending remote mutations
pub struct SyncQueue {
    repository: Arc<dyn SyncQueueRepository>,
    clock: Arc<dyn Clock>,
}

impl SyncQueue {
    pub fn new(repository: Arc<dyn SyncQueueRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Append a new operation with `retry_count = 0`.
    ///
    /// The operation is committed before this returns.
    pub async fn enqueue(
        &self,
        op_type: SyncOperationType,
        entity_id: impl Into<String>,
        action: SyncAction,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        let op = SyncOperation::new(
            op_type,
            entity_id,
            action,
            payload,
            self.clock.unix_timestamp_millis(),
        );
        self.repository.append(&op).await?;

        debug!(
            operation_id = %op.id,
            op_type = %op.op_type,
            entity_id = %op.entity_id,
            "Enqueued sync operation"
        );
        Ok(op)
    }

    pub async fn peek_batch(&self, limit: usize) -> Result<Vec<SyncOperation>> {
        self.repository.peek_batch(limit).await
    }

    pub async fn pending(&self) -> Result<Vec<SyncOperation>> {
        self.repository.load_all().await
    }

    /// Remove an operation after a successful apply.
    pub async fn complete(&self, id: SyncOperationId) -> Result<()> {
        self.repository.remove(id).await?;
        Ok(())
    }

    /// Count a failed attempt and either requeue or drop `op`.
    pub async fn record_failure(
        &self,
        op: &mut SyncOperation,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome> {
        op.record_failure(error, self.clock.unix_timestamp_millis());

        if op.can_retry(max_retries) {
            self.repository.requeue_entity_tail(op).await?;
            debug!(
                operation_id = %op.id,
                retry_count = op.retry_count,
                "Requeued sync operation"
            );
            Ok(FailureOutcome::Requeued)
        } else {
            self.repository.remove(op.id).await?;
            info!(
                operation_id = %op.id,
                op_type = %op.op_type,
                entity_id = %op.entity_id,
                retry_count = op.retry_count,
                "Dropped sync operation after exhausting retries"
            );
            Ok(FailureOutcome::Dropped)
        }
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.repository.count().await? as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Discard every queued operation. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        Ok(self.repository.clear().await? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use core_runtime::db::create_test_pool;
    use serde_json::json;

    async fn queue() -> SyncQueue {
        let pool = create_test_pool().await.unwrap();
        let repository = SqliteSyncQueueRepository::new(pool);
        repository.initialize().await.unwrap();
        SyncQueue::new(Arc::new(repository), Arc::new(ManualClock::new(5_000)))
    }

    fn entity_ids(ops: &[SyncOperation]) -> Vec<&str> {
        ops.iter().map(|op| op.entity_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let queue = queue().await;
        for id in ["a", "b", "c"] {
            queue
                .enqueue(
                    SyncOperationType::RecipeAccess,
                    id,
                    SyncAction::Upsert,
                    json!({"id": id}),
                )
                .await
                .unwrap();
        }

        let batch = queue.peek_batch(2).await.unwrap();
        assert_eq!(entity_ids(&batch), vec!["a", "b"]);
        assert_eq!(batch[0].timestamp, 5_000);
        assert_eq!(batch[0].payload, json!({"id": "a"}));
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failure_moves_entity_to_tail_in_order() {
        let queue = queue().await;
        let mut first = queue
            .enqueue(SyncOperationType::RecipeFavorite, "r-1", SyncAction::Upsert, json!(1))
            .await
            .unwrap();
        queue
            .enqueue(SyncOperationType::RecipeAccess, "r-2", SyncAction::Upsert, json!(2))
            .await
            .unwrap();
        queue
            .enqueue(SyncOperationType::RecipeFavorite, "r-1", SyncAction::Delete, json!(3))
            .await
            .unwrap();
        queue
            .enqueue(SyncOperationType::RecipeAccess, "r-3", SyncAction::Upsert, json!(4))
            .await
            .unwrap();

        let outcome = queue.record_failure(&mut first, "reset", 3).await.unwrap();
        assert_eq!(outcome, FailureOutcome::Requeued);

        let pending = queue.pending().await.unwrap();
        let payloads: Vec<_> = pending.iter().map(|op| op.payload.clone()).collect();
        assert_eq!(payloads, vec![json!(2), json!(4), json!(1), json!(3)]);
        assert_eq!(pending[2].retry_count, 1);
        assert_eq!(pending[2].last_error.as_deref(), Some("reset"));
    }

    #[tokio::test]
    async fn test_exhausted_operation_is_dropped() {
        let queue = queue().await;
        let mut op = queue
            .enqueue(SyncOperationType::ChatMessage, "m-1", SyncAction::Upsert, json!({}))
            .await
            .unwrap();
        op.retry_count = 2;

        let outcome = queue.record_failure(&mut op, "bad gateway", 3).await.unwrap();

        assert_eq!(outcome, FailureOutcome::Dropped);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_and_clear() {
        let queue = queue().await;
        let op = queue
            .enqueue(SyncOperationType::ImageCache, "i-1", SyncAction::Upsert, json!({}))
            .await
            .unwrap();
        queue
            .enqueue(SyncOperationType::ImageCache, "i-2", SyncAction::Upsert, json!({}))
            .await
            .unwrap();

        queue.complete(op.id).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        assert_eq!(queue.clear().await.unwrap(), 1);
        assert!(queue.is_empty().await.unwrap());
    }
}
