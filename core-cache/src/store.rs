//! # Cache Store
//!
//! Size-bounded key/value store for recipe, image and data payloads.
//!
//! ## Admission
//!
//! A put is admitted only after the eviction engine has found room for it:
//!
//! 1. Reject payloads larger than the whole budget.
//! 2. Take the per-key lock so writers of one key serialise.
//! 3. Under the state lock, credit back any entry being replaced and plan
//!    room for the new bytes. Victims are claimed through their key locks so
//!    an entry that is being rewritten is never deleted underneath its writer.
//! 4. Apply the plan to the index and reserve the new bytes, then write to
//!    storage with no lock held but the key lock.
//!
//! The state lock is a `parking_lot::Mutex` and is never held across an
//! `.await`.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::eviction::{EvictionEngine, EvictionPlan};
use crate::key::cache_key;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::metadata::{clamp_priority, CacheEntryMetadata, CacheEntryType, MetadataIndex};
use crate::repository::CacheRepository;
use crate::stats::{CacheStatsReport, StatsTracker};
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EvictionReason};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default)]
struct CacheState {
    index: MetadataIndex,
    stats: StatsTracker,
}

enum Lookup {
    Missing,
    Expired,
    Fresh { created_at: i64 },
}

/// Durable, size-bounded payload cache.
pub struct CacheStore {
    config: CacheConfig,
    engine: EvictionEngine,
    repository: Arc<dyn CacheRepository>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    key_locks: KeyedLocks,
    stats_writer: AsyncMutex<()>,
    event_bus: Option<Arc<EventBus>>,
    initialized: AtomicBool,
}

impl CacheStore {
    /// Create a store over `repository`. Call [`init`](Self::init) before use.
    pub fn new(
        config: CacheConfig,
        repository: Arc<dyn CacheRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::InvalidConfig)?;

        Ok(Self {
            engine: EvictionEngine::new(&config),
            config,
            repository,
            clock,
            state: Mutex::new(CacheState::default()),
            key_locks: KeyedLocks::new(),
            stats_writer: AsyncMutex::new(()),
            event_bus: None,
            initialized: AtomicBool::new(false),
        })
    }

    /// Publish eviction and maintenance events on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Create tables and load the metadata index and stats.
    ///
    /// Persisted totals are recomputed from the loaded entries so a crash
    /// between an entry write and a stats write cannot leave drift behind.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        self.repository.initialize().await?;

        let entries = self.repository.load_entries().await?;
        let stats = self.repository.load_stats().await?;

        {
            let mut state = self.state.lock();
            state.index = MetadataIndex::from_entries(entries);
            state.stats = stats.map(StatsTracker::from_stats).unwrap_or_default();

            let total_size = state.index.total_size();
            let total_items = state.index.len() as u64;
            if state.stats.reconcile(total_size, total_items) {
                warn!(total_size, total_items, "Cache stats drifted from entries, reconciled");
            }

            info!(
                entries = total_items,
                total_size,
                max_size = self.engine.max_size(),
                "Cache store initialized"
            );
        }

        self.initialized.store(true, Ordering::SeqCst);

        // Rows whose delete failed before a restart come back here.
        let over_budget = self.state.lock().index.total_size() > self.engine.max_size();
        if over_budget {
            warn!("Loaded cache exceeds its budget, running cleanup");
            self.perform_cleanup().await?;
        }

        self.persist_stats().await;
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::NotInitialized)
        }
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Deterministic key for `logical_id` of `entry_type`.
    pub fn key_for(&self, entry_type: CacheEntryType, logical_id: &str) -> String {
        cache_key(entry_type, logical_id)
    }

    /// Store `payload` under the key derived from `(entry_type, logical_id)`
    /// with the type's default time-to-live. Returns the key.
    ///
    /// # Errors
    ///
    /// - [`CacheError::SizeExceeded`] if the payload is larger than the budget
    ///   or room cannot be made without evicting pinned or busy entries
    /// - [`CacheError::Storage`] if the write fails
    pub async fn put(
        &self,
        logical_id: &str,
        entry_type: CacheEntryType,
        payload: Bytes,
        priority: u8,
    ) -> Result<String> {
        let ttl = self.config.ttl_for(entry_type);
        self.put_inner(logical_id, entry_type, payload, priority, ttl)
            .await
    }

    /// Like [`put`](Self::put) with an explicit time-to-live.
    pub async fn put_with_ttl(
        &self,
        logical_id: &str,
        entry_type: CacheEntryType,
        payload: Bytes,
        priority: u8,
        ttl: Duration,
    ) -> Result<String> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidInput(
                "time-to-live must be greater than zero".to_string(),
            ));
        }
        self.put_inner(logical_id, entry_type, payload, priority, ttl)
            .await
    }

    #[instrument(skip(self, payload), fields(size = payload.len()))]
    async fn put_inner(
        &self,
        logical_id: &str,
        entry_type: CacheEntryType,
        payload: Bytes,
        priority: u8,
        ttl: Duration,
    ) -> Result<String> {
        self.ensure_initialized()?;

        let key = cache_key(entry_type, logical_id);
        let size = payload.len() as u64;
        let max = self.engine.max_size();
        if size > max {
            return Err(CacheError::SizeExceeded { size, max });
        }

        let priority = clamp_priority(priority);
        let _guard = self.key_locks.lock(&key).await;
        let now = self.now();

        let mut victims: Vec<KeyGuard> = Vec::new();
        let (plan, stale) = {
            let mut state = self.state.lock();

            let replaced = state.index.remove(&key);
            if let Some(old) = &replaced {
                state.stats.record_remove(old.size);
            }

            let locks = &self.key_locks;
            let mut claim = |candidate: &str| match locks.try_lock(candidate) {
                Some(guard) => {
                    victims.push(guard);
                    true
                }
                None => false,
            };
            let mut plan = self.engine.plan(&state.index, size, now, &mut claim);

            let mut stale = None;
            if plan.fits {
                apply_plan(&mut state, &plan);
                state.index.reserve(size);
            } else {
                plan.evicted.clear();
                apply_plan(&mut state, &plan);

                if let Some(old) = replaced {
                    if old.is_expired(now) {
                        stale = Some(old);
                    } else {
                        state.stats.record_insert(old.size);
                        state.index.insert(old);
                    }
                }
            }

            (plan, stale)
        };

        let mut removals = removals_of(&plan);
        if let Some(old) = stale {
            removals.push((old, EvictionReason::Expired));
        }
        self.purge(removals).await;
        drop(victims);

        if !plan.fits {
            self.persist_stats().await;
            debug!(key = %key, size, "No room for cache entry");
            return Err(CacheError::SizeExceeded { size, max });
        }

        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntryMetadata::new(&key, entry_type, size, now, ttl_millis, priority);
        let written = self.repository.write_entry(&entry, &payload).await;

        {
            let mut state = self.state.lock();
            state.index.release(size);
            if written.is_ok() {
                state.index.insert(entry);
                state.stats.record_insert(size);
            }
        }

        if let Err(e) = written {
            warn!(key = %key, error = %e, "Cache write failed");
            if let Err(cleanup) = self.repository.delete_entries(&[key.clone()]).await {
                warn!(key = %key, error = %cleanup, "Failed to remove stale cache row");
            }
            self.persist_stats().await;
            return Err(e);
        }

        self.persist_stats().await;
        debug!(key = %key, size, priority, "Cached entry");
        Ok(key)
    }

    /// Look up a payload.
    ///
    /// Expired entries are removed on the way and reported as a miss. Storage
    /// read failures are logged and also count as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.ensure_initialized()?;
        let now = self.now();

        let lookup = {
            let mut state = self.state.lock();
            match state.index.get(key) {
                None => {
                    state.stats.record_miss();
                    Lookup::Missing
                }
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(entry) => Lookup::Fresh {
                    created_at: entry.created_at,
                },
            }
        };

        let created_at = match lookup {
            Lookup::Missing => {
                self.persist_stats().await;
                return Ok(None);
            }
            Lookup::Expired => {
                let expired = |entry: &CacheEntryMetadata| entry.is_expired(now);
                self.drop_entry(key, &expired).await;
                return Ok(None);
            }
            Lookup::Fresh { created_at } => created_at,
        };

        match self.repository.read_payload(key).await {
            Ok(Some(payload)) => {
                let touched = {
                    let mut state = self.state.lock();
                    let touched = state.index.get_mut(key).map(|entry| {
                        entry.record_access(now);
                        (entry.last_accessed, entry.access_count)
                    });
                    if touched.is_some() {
                        state.stats.record_hit();
                    } else {
                        state.stats.record_miss();
                    }
                    touched
                };

                let Some((last_accessed, access_count)) = touched else {
                    self.persist_stats().await;
                    return Ok(None);
                };

                if let Err(e) = self
                    .repository
                    .touch_entry(key, last_accessed, access_count)
                    .await
                {
                    warn!(key = %key, error = %e, "Failed to persist cache access");
                }
                self.persist_stats().await;

                Ok(Some(payload))
            }
            Ok(None) => {
                warn!(key = %key, "Cache entry has no payload, dropping it");
                let same_entry = |entry: &CacheEntryMetadata| entry.created_at == created_at;
                self.drop_entry(key, &same_entry).await;
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                self.state.lock().stats.record_miss();
                self.persist_stats().await;
                Ok(None)
            }
        }
    }

    /// Remove an entry found unusable during `get` and count the miss.
    ///
    /// `still_stale` re-checks the entry under the lock; a writer may have
    /// replaced it in the meantime. Skipped entirely if a writer holds the key.
    async fn drop_entry(&self, key: &str, still_stale: &dyn Fn(&CacheEntryMetadata) -> bool) {
        let Some(guard) = self.key_locks.try_lock(key) else {
            self.state.lock().stats.record_miss();
            self.persist_stats().await;
            return;
        };

        let removed = {
            let mut state = self.state.lock();
            state.stats.record_miss();

            if state.index.get(key).is_some_and(still_stale) {
                let removed = state.index.remove(key);
                if let Some(entry) = &removed {
                    state.stats.record_remove(entry.size);
                }
                removed
            } else {
                None
            }
        };

        if let Some(entry) = removed {
            self.purge(vec![(entry, EvictionReason::Expired)]).await;
        }
        drop(guard);

        self.persist_stats().await;
    }

    /// Delete an entry. Returns whether it was resident.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.ensure_initialized()?;
        let _guard = self.key_locks.lock(key).await;

        let removed = {
            let mut state = self.state.lock();
            let removed = state.index.remove(key);
            if let Some(entry) = &removed {
                state.stats.record_remove(entry.size);
            }
            removed
        };

        let Some(entry) = removed else {
            return Ok(false);
        };

        if let Err(e) = self.repository.delete_entries(&[key.to_string()]).await {
            let mut state = self.state.lock();
            state.stats.record_insert(entry.size);
            state.index.insert(entry);
            return Err(e);
        }

        self.persist_stats().await;
        debug!(key = %key, "Removed cache entry");
        Ok(true)
    }

    /// Remove every entry and reset the counters.
    ///
    /// Storage is cleared first; if that fails the index and counters are
    /// left untouched. Writes racing with `clear` may be dropped; a `get` for
    /// such a key cleans up whatever is left.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        self.ensure_initialized()?;

        if let Err(e) = self.repository.clear().await {
            warn!(error = %e, "Failed to clear cache storage");
            return Err(e);
        }

        let now = self.now();
        let removed = {
            let mut state = self.state.lock();
            let removed = state.index.drain().len();
            state.stats.reset(now);
            removed
        };

        self.persist_stats().await;

        info!(removed, "Cache cleared");
        self.emit(CacheEvent::Cleared { removed });
        Ok(removed)
    }

    /// Sweep expired entries and evict down to the target ratio if the cache
    /// is above its cleanup threshold. Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn perform_cleanup(&self) -> Result<usize> {
        self.ensure_initialized()?;
        let now = self.now();

        let mut victims: Vec<KeyGuard> = Vec::new();
        let (plan, total_size, total_items) = {
            let mut state = self.state.lock();

            let locks = &self.key_locks;
            let mut claim = |candidate: &str| match locks.try_lock(candidate) {
                Some(guard) => {
                    victims.push(guard);
                    true
                }
                None => false,
            };
            let plan = self.engine.plan(&state.index, 0, now, &mut claim);

            apply_plan(&mut state, &plan);
            state.stats.record_cleanup(now);

            let stats = state.stats.snapshot();
            (plan, stats.total_size, stats.total_items)
        };

        let removed = plan.removed_count();
        self.purge(removals_of(&plan)).await;
        drop(victims);
        self.persist_stats().await;

        info!(
            removed,
            freed_bytes = plan.freed_bytes(),
            total_size,
            "Cache cleanup completed"
        );
        self.emit(CacheEvent::CleanupCompleted {
            removed,
            total_size,
            total_items,
        });
        Ok(removed)
    }

    /// Fresh residency check that leaves access stats untouched.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.now();
        self.state
            .lock()
            .index
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn metadata(&self, key: &str) -> Option<CacheEntryMetadata> {
        self.state.lock().index.get(key).cloned()
    }

    pub fn get_stats(&self) -> CacheStatsReport {
        let state = self.state.lock();
        CacheStatsReport::new(
            state.stats.snapshot(),
            self.engine.max_size(),
            state.index.reserved(),
            state.index.usage_by_type(),
        )
    }

    /// Persist pending counter changes. Every operation already does this;
    /// after a failed write the counters stay dirty until the next call.
    pub async fn flush(&self) -> Result<()> {
        let _writer = self.stats_writer.lock().await;

        let dirty = self.state.lock().stats.take_dirty();
        if let Some(stats) = dirty {
            if let Err(e) = self.repository.save_stats(&stats).await {
                self.state.lock().stats.mark_dirty();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn persist_stats(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Failed to persist cache stats");
        }
    }

    /// Delete removed entries from storage and announce them.
    async fn purge(&self, removals: Vec<(CacheEntryMetadata, EvictionReason)>) {
        if removals.is_empty() {
            return;
        }

        let keys: Vec<String> = removals.iter().map(|(entry, _)| entry.key.clone()).collect();
        if let Err(e) = self.repository.delete_entries(&keys).await {
            warn!(count = keys.len(), error = %e, "Failed to delete evicted cache rows");
        }

        for (entry, reason) in removals {
            debug!(key = %entry.key, size = entry.size, ?reason, "Evicted cache entry");
            self.emit(CacheEvent::EntryEvicted {
                key: entry.key,
                entry_type: entry.entry_type.to_string(),
                size: entry.size,
                reason,
            });
        }
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}

fn apply_plan(state: &mut CacheState, plan: &EvictionPlan) {
    for entry in plan.expired.iter().chain(plan.evicted.iter()) {
        if let Some(removed) = state.index.remove(&entry.key) {
            state.stats.record_remove(removed.size);
        }
    }
}

fn removals_of(plan: &EvictionPlan) -> Vec<(CacheEntryMetadata, EvictionReason)> {
    plan.expired
        .iter()
        .map(|entry| (entry.clone(), EvictionReason::Expired))
        .chain(
            plan.evicted
                .iter()
                .map(|entry| (entry.clone(), EvictionReason::Pressure)),
        )
        .collect()
}
