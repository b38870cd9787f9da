//! # Offline Sync Module
//!
//! Reconciles local mutations with the remote store.
//!
//! ## Overview
//!
//! Feature code enqueues mutations (recipe access, favorites, cached images,
//! chat messages) while online or offline. The engine drains the queue when
//! connectivity allows:
//! - Operations for the same entity are applied in queue order
//! - Failed operations are retried at the tail, then dropped after
//!   `max_retries`
//! - A rejected credential pauses every attempt behind a doubling backoff
//!
//! ## Components
//!
//! - **Operation** (`operation`): Queued mutation model
//! - **Sync Queue** (`queue`): Durable ordered queue persisted in SQLite
//! - **Sync Engine** (`engine`): Single-flight drains, scheduling and backoff

pub mod engine;
pub mod error;
pub mod operation;
pub mod queue;

pub use engine::{SkipReason, SyncConfig, SyncEngine, SyncFailure, SyncResult, SyncStatus};
pub use error::{Result, SyncError};
pub use operation::{SyncAction, SyncOperation, SyncOperationId, SyncOperationType};
pub use queue::{FailureOutcome, SqliteSyncQueueRepository, SyncQueue, SyncQueueRepository};
