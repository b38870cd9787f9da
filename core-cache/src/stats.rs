//! Cache statistics and monitoring

use crate::metadata::{CacheEntryType, TypeUsage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate counters persisted alongside the entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Sum of resident entry sizes in bytes
    pub total_size: u64,

    /// Number of resident entries
    pub total_items: u64,

    /// Unix milliseconds of the last cleanup or clear
    pub last_cleanup: Option<i64>,

    pub hit_count: u64,
    pub miss_count: u64,
}

impl CacheStats {
    /// Hits over lookups, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hit_count + self.miss_count;
        if lookups == 0 {
            return 0.0;
        }

        self.hit_count as f64 / lookups as f64
    }

    /// Calculate cache usage as a percentage of max size.
    pub fn usage_percentage(&self, max_size: u64) -> f64 {
        if max_size == 0 {
            return 0.0;
        }

        (self.total_size as f64 / max_size as f64) * 100.0
    }
}

/// Maintains [`CacheStats`] as entries come and go.
///
/// Lives next to the metadata index under the store's state lock, so the
/// totals always move together with the index.
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: CacheStats,
    dirty: bool,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted counters.
    pub fn from_stats(stats: CacheStats) -> Self {
        Self {
            stats,
            dirty: false,
        }
    }

    pub fn record_hit(&mut self) {
        self.stats.hit_count += 1;
        self.dirty = true;
    }

    pub fn record_miss(&mut self) {
        self.stats.miss_count += 1;
        self.dirty = true;
    }

    pub fn record_insert(&mut self, size: u64) {
        self.stats.total_size += size;
        self.stats.total_items += 1;
        self.dirty = true;
    }

    pub fn record_remove(&mut self, size: u64) {
        self.stats.total_size = self.stats.total_size.saturating_sub(size);
        self.stats.total_items = self.stats.total_items.saturating_sub(1);
        self.dirty = true;
    }

    pub fn record_cleanup(&mut self, now: i64) {
        self.stats.last_cleanup = Some(now);
        self.dirty = true;
    }

    /// Zero every counter; used by `clear()`.
    pub fn reset(&mut self, now: i64) {
        self.stats = CacheStats {
            last_cleanup: Some(now),
            ..CacheStats::default()
        };
        self.dirty = true;
    }

    /// Overwrite the totals with values recomputed from the index.
    ///
    /// Returns true if the persisted totals had drifted.
    pub fn reconcile(&mut self, total_size: u64, total_items: u64) -> bool {
        let drifted =
            self.stats.total_size != total_size || self.stats.total_items != total_items;
        if drifted {
            self.stats.total_size = total_size;
            self.stats.total_items = total_items;
            self.dirty = true;
        }
        drifted
    }

    pub fn snapshot(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Snapshot for persisting if anything changed since the last call.
    pub fn take_dirty(&mut self) -> Option<CacheStats> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.stats.clone())
    }

    /// Undo `take_dirty` after a failed write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Stats plus derived figures returned by `CacheStore::get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub max_size: u64,
    pub usage_percentage: f64,
    /// Bytes admitted for writes still in flight
    pub reserved_bytes: u64,
    pub breakdown: HashMap<CacheEntryType, TypeUsage>,
}

impl CacheStatsReport {
    pub fn new(
        stats: CacheStats,
        max_size: u64,
        reserved_bytes: u64,
        breakdown: HashMap<CacheEntryType, TypeUsage>,
    ) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            usage_percentage: stats.usage_percentage(max_size),
            stats,
            max_size,
            reserved_bytes,
            breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut tracker = StatsTracker::new();
        assert_eq!(tracker.snapshot().hit_rate(), 0.0);

        tracker.record_hit();
        tracker.record_hit();
        tracker.record_hit();
        tracker.record_miss();
        assert!((tracker.snapshot().hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usage_percentage() {
        let stats = CacheStats {
            total_size: 950,
            total_items: 2,
            ..CacheStats::default()
        };

        assert!((stats.usage_percentage(1000) - 95.0).abs() < f64::EPSILON);
        assert_eq!(stats.usage_percentage(0), 0.0);
    }

    #[test]
    fn test_insert_remove_totals() {
        let mut tracker = StatsTracker::new();
        tracker.record_insert(400);
        tracker.record_insert(100);
        tracker.record_remove(400);

        let stats = tracker.snapshot();
        assert_eq!(stats.total_size, 100);
        assert_eq!(stats.total_items, 1);
    }

    #[test]
    fn test_reset_keeps_cleanup_time() {
        let mut tracker = StatsTracker::new();
        tracker.record_insert(10);
        tracker.record_hit();
        tracker.reset(1234);

        let stats = tracker.snapshot();
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.last_cleanup, Some(1234));
    }

    #[test]
    fn test_reconcile_detects_drift() {
        let mut tracker = StatsTracker::from_stats(CacheStats {
            total_size: 500,
            total_items: 3,
            hit_count: 7,
            ..CacheStats::default()
        });

        assert!(tracker.reconcile(300, 2));
        assert!(!tracker.reconcile(300, 2));

        let stats = tracker.snapshot();
        assert_eq!(stats.total_size, 300);
        assert_eq!(stats.hit_count, 7);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut tracker = StatsTracker::new();
        assert!(tracker.take_dirty().is_none());

        tracker.record_miss();
        assert_eq!(tracker.take_dirty().map(|s| s.miss_count), Some(1));
        assert!(tracker.take_dirty().is_none());

        tracker.mark_dirty();
        assert!(tracker.take_dirty().is_some());
    }

    #[test]
    fn test_report_derives_rates() {
        let stats = CacheStats {
            total_size: 250,
            total_items: 1,
            hit_count: 1,
            miss_count: 1,
            last_cleanup: None,
        };
        let report = CacheStatsReport::new(stats, 1000, 0, HashMap::new());

        assert!((report.hit_rate - 0.5).abs() < f64::EPSILON);
        assert!((report.usage_percentage - 25.0).abs() < f64::EPSILON);
    }
}
