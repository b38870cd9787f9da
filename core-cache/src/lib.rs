//! # Offline Cache
//!
//! Size-bounded, priority-aware payload cache backed by SQLite.
//!
//! ## Overview
//!
//! - [`CacheStore`] - put/get/remove with lazy expiration and pre-write
//!   budget enforcement
//! - [`EvictionEngine`] - expiration sweep plus priority and recency eviction
//! - [`MetadataIndex`] / [`StatsTracker`] - in-memory bookkeeping kept in step
//!   with the `cache_entries` and `cache_stats` tables
//! - [`CacheWarmer`] - pre-seeds favorites and frequently accessed entities
//!
//! ## Usage
//!
//! ```ignore
//! use core_cache::{CacheConfig, CacheEntryType, CacheStore, SqliteCacheRepository};
//!
//! let store = CacheStore::new(
//!     CacheConfig::default(),
//!     Arc::new(SqliteCacheRepository::new(pool)),
//!     Arc::new(SystemClock),
//! )?;
//! store.init().await?;
//!
//! let key = store.put("recipe-42", CacheEntryType::Recipe, payload, 5).await?;
//! let cached = store.get(&key).await?;
//! ```

pub mod config;
pub mod error;
pub mod eviction;
pub mod key;
mod locks;
pub mod metadata;
pub mod repository;
pub mod stats;
pub mod store;
pub mod warmer;

pub use config::{CacheConfig, WarmConfig};
pub use error::{CacheError, Result};
pub use eviction::{EvictionEngine, EvictionPlan};
pub use key::cache_key;
pub use metadata::{CacheEntryMetadata, CacheEntryType, MetadataIndex, TypeUsage};
pub use repository::{CacheRepository, SqliteCacheRepository};
pub use stats::{CacheStats, CacheStatsReport, StatsTracker};
pub use store::CacheStore;
pub use warmer::{CacheWarmer, WarmReport};
