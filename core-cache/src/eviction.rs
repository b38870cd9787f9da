//! # Eviction Engine
//!
//! Decides which entries leave the cache so a write of `required` bytes fits
//! the budget.
//!
//! 1. Every entry with `now > expires_at` is swept.
//! 2. If `total + reserved + required` still exceeds the cleanup threshold
//!    (80% of the budget), entries are evicted in `(priority, last_accessed,
//!    created_at)` order until usage is at or below the target ratio (70%)
//!    and the write fits.
//! 3. If the write still does not fit, the plan is rejected. Only its
//!    expirations are applied.
//!
//! Planning is pure: it reads the index and returns a plan. The caller applies
//! it under the state lock, then deletes payloads after releasing it.

use crate::config::CacheConfig;
use crate::metadata::{CacheEntryMetadata, MetadataIndex};

/// Outcome of planning for one write or cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Entries past their expiry; always applied
    pub expired: Vec<CacheEntryMetadata>,
    /// Entries removed for space; applied only when `fits`
    pub evicted: Vec<CacheEntryMetadata>,
    /// Whether `required` bytes fit once the plan is applied
    pub fits: bool,
}

impl EvictionPlan {
    pub fn removed_count(&self) -> usize {
        self.expired.len() + self.evicted.len()
    }

    pub fn freed_bytes(&self) -> u64 {
        self.expired
            .iter()
            .chain(self.evicted.iter())
            .map(|entry| entry.size)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct EvictionEngine {
    max_size: u64,
    threshold_bytes: u64,
    target_bytes: u64,
    pinned_priority: Option<u8>,
}

impl EvictionEngine {
    pub fn new(config: &CacheConfig) -> Self {
        let max_size = config.max_cache_size_bytes;
        Self {
            max_size,
            threshold_bytes: (max_size as f64 * config.cleanup_threshold) as u64,
            target_bytes: (max_size as f64 * config.target_ratio) as u64,
            pinned_priority: config.pinned_priority,
        }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn is_pinned(&self, entry: &CacheEntryMetadata) -> bool {
        self.pinned_priority
            .is_some_and(|pinned| entry.priority >= pinned)
    }

    /// Plan room for `required` more bytes.
    ///
    /// `claim` is asked before an entry is selected; returning false skips it
    /// (its key is busy with a concurrent write). Every entry in the plan was
    /// successfully claimed.
    pub fn plan(
        &self,
        index: &MetadataIndex,
        required: u64,
        now: i64,
        claim: &mut dyn FnMut(&str) -> bool,
    ) -> EvictionPlan {
        let reserved = index.reserved();
        let mut total = index.total_size();
        let mut plan = EvictionPlan::default();

        let mut expired: Vec<&CacheEntryMetadata> =
            index.iter().filter(|entry| entry.is_expired(now)).collect();
        expired.sort_by(|a, b| a.key.cmp(&b.key));

        for entry in expired {
            if claim(&entry.key) {
                total -= entry.size;
                plan.expired.push(entry.clone());
            }
        }

        let projected = |total: u64| total.saturating_add(reserved).saturating_add(required);

        if projected(total) > self.threshold_bytes {
            for entry in index.eviction_order() {
                if total <= self.target_bytes && projected(total) <= self.max_size {
                    break;
                }

                if entry.is_expired(now) || self.is_pinned(entry) {
                    continue;
                }

                if !claim(&entry.key) {
                    continue;
                }

                total -= entry.size;
                plan.evicted.push(entry.clone());
            }
        }

        plan.fits = projected(total) <= self.max_size;
        plan
    }
}
