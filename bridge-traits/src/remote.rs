//! Remote Store Abstraction
//!
//! The authenticated client the core uses to reconcile queued mutations and to
//! fetch payloads for cache warming. The remote schema and query language are
//! owned by the host; the core only addresses records by collection and
//! entity id.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A cache-worthy entity reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmCandidate {
    /// Entity kind as understood by the cache (`"recipe"`, `"image"`, `"data"`)
    pub kind: String,
    /// Logical identifier of the entity
    pub entity_id: String,
    /// Whether the user marked this entity as a favorite
    pub is_favorite: bool,
    /// Access frequency used for ranking (higher is hotter)
    pub access_count: u64,
}

impl WarmCandidate {
    pub fn new(kind: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            entity_id: entity_id.into(),
            is_favorite: false,
            access_count: 0,
        }
    }

    pub fn favorite(mut self) -> Self {
        self.is_favorite = true;
        self
    }

    pub fn with_access_count(mut self, count: u64) -> Self {
        self.access_count = count;
        self
    }
}

/// Authenticated remote store client.
///
/// # Idempotency
///
/// `upsert` and `delete` MUST be idempotent: the sync engine may send the same
/// operation twice when the process stops between a successful remote apply
/// and the local dequeue. Applying an operation twice must leave the remote in
/// the same state as applying it once.
///
/// # Errors
///
/// Return [`BridgeError::Unauthorized`](crate::BridgeError::Unauthorized) when
/// credentials are rejected so the engine can back off instead of retrying
/// every queued operation.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Insert or replace the record `entity_id` in `collection`.
    async fn upsert(
        &self,
        collection: &str,
        entity_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()>;

    /// Delete the record; deleting a missing record succeeds.
    async fn delete(&self, collection: &str, entity_id: &str) -> Result<()>;

    /// Fetch the full payload of an entity for local caching.
    ///
    /// Returns `Ok(None)` if the entity no longer exists.
    async fn fetch(&self, kind: &str, entity_id: &str) -> Result<Option<Bytes>>;

    /// List cache-worthy entities: the `limit` most frequently accessed plus
    /// every favorite.
    async fn warm_candidates(&self, limit: usize) -> Result<Vec<WarmCandidate>>;
}
