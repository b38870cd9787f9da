//! Queued remote mutations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Type-safe operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncOperationId(Uuid);

impl SyncOperationId {
    /// Create a new random operation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an operation ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidOperationId(e.to_string()))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncOperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncOperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of record an operation mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationType {
    RecipeAccess,
    RecipeFavorite,
    ImageCache,
    ChatMessage,
}

impl SyncOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecipeAccess => "recipe_access",
            Self::RecipeFavorite => "recipe_favorite",
            Self::ImageCache => "image_cache",
            Self::ChatMessage => "chat_message",
        }
    }

    /// Remote collection the operation is applied to.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::RecipeAccess => "recipe_access",
            Self::RecipeFavorite => "recipe_favorites",
            Self::ImageCache => "image_cache",
            Self::ChatMessage => "chat_messages",
        }
    }
}

impl fmt::Display for SyncOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recipe_access" => Ok(Self::RecipeAccess),
            "recipe_favorite" => Ok(Self::RecipeFavorite),
            "image_cache" => Ok(Self::ImageCache),
            "chat_message" => Ok(Self::ChatMessage),
            _ => Err(SyncError::InvalidOperationType(s.to_string())),
        }
    }
}

/// What the remote apply does with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Insert or replace the record with the payload
    #[default]
    Upsert,
    /// Delete the record; deleting a missing record succeeds
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for SyncAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            _ => Err(SyncError::InvalidAction(s.to_string())),
        }
    }
}

/// A local mutation waiting to be applied to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: SyncOperationId,
    pub op_type: SyncOperationType,
    pub entity_id: String,
    pub action: SyncAction,
    /// Opaque to the engine; handed to the remote client as is
    pub payload: serde_json::Value,
    /// Unix milliseconds when enqueued
    pub timestamp: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<i64>,
}

impl SyncOperation {
    pub fn new(
        op_type: SyncOperationType,
        entity_id: impl Into<String>,
        action: SyncAction,
        payload: serde_json::Value,
        timestamp: i64,
    ) -> Self {
        Self {
            id: SyncOperationId::new(),
            op_type,
            entity_id: entity_id.into(),
            action,
            payload,
            timestamp,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Operations sharing this key address the same remote record and must
    /// be applied in queue order.
    pub fn entity_key(&self) -> (SyncOperationType, &str) {
        (self.op_type, &self.entity_id)
    }

    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }

    /// Count a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, now: i64) {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(now);
    }
}
