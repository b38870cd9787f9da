//! Cache configuration and policies

use crate::metadata::CacheEntryType;
use std::time::Duration;

/// Start evicting once projected usage passes this share of the budget.
pub const CLEANUP_THRESHOLD: f64 = 0.8;

/// Evict down to this share of the budget.
pub const TARGET_RATIO: f64 = 0.7;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Configuration for the cache store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum total payload bytes (default: 100 MB)
    pub max_cache_size_bytes: u64,

    /// Usage ratio that triggers pressure eviction (default: 0.8)
    pub cleanup_threshold: f64,

    /// Usage ratio eviction aims for (default: 0.7)
    pub target_ratio: f64,

    /// Entries at or above this priority are never evicted for space.
    /// They still expire. `None` disables pinning.
    pub pinned_priority: Option<u8>,

    /// Default time-to-live for images (default: 7 days)
    pub image_ttl: Duration,

    /// Default time-to-live for recipes (default: 24 hours)
    pub recipe_ttl: Duration,

    /// Default time-to-live for other data (default: 6 hours)
    pub data_ttl: Duration,

    /// Interval for the background cleanup task (default: 1 hour)
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 100 * 1024 * 1024,
            cleanup_threshold: CLEANUP_THRESHOLD,
            target_ratio: TARGET_RATIO,
            pinned_priority: None,
            image_ttl: 7 * 24 * HOUR,
            recipe_ttl: 24 * HOUR,
            data_ttl: 6 * HOUR,
            cleanup_interval: HOUR,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    pub fn with_thresholds(mut self, cleanup_threshold: f64, target_ratio: f64) -> Self {
        self.cleanup_threshold = cleanup_threshold;
        self.target_ratio = target_ratio;
        self
    }

    pub fn with_pinned_priority(mut self, priority: u8) -> Self {
        self.pinned_priority = Some(priority);
        self
    }

    pub fn with_ttl(mut self, entry_type: CacheEntryType, ttl: Duration) -> Self {
        match entry_type {
            CacheEntryType::Image => self.image_ttl = ttl,
            CacheEntryType::Recipe => self.recipe_ttl = ttl,
            CacheEntryType::Data => self.data_ttl = ttl,
        }
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Default time-to-live for an entry type.
    pub fn ttl_for(&self, entry_type: CacheEntryType) -> Duration {
        match entry_type {
            CacheEntryType::Image => self.image_ttl,
            CacheEntryType::Recipe => self.recipe_ttl,
            CacheEntryType::Data => self.data_ttl,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }

        if !(self.target_ratio > 0.0 && self.target_ratio <= self.cleanup_threshold) {
            return Err("target_ratio must be in (0, cleanup_threshold]".to_string());
        }

        if self.cleanup_threshold > 1.0 {
            return Err("cleanup_threshold cannot exceed 1.0".to_string());
        }

        if let Some(pinned) = self.pinned_priority {
            if !(1..=10).contains(&pinned) {
                return Err("pinned_priority must be between 1 and 10".to_string());
            }
        }

        if [self.image_ttl, self.recipe_ttl, self.data_ttl]
            .iter()
            .any(Duration::is_zero)
        {
            return Err("entry TTLs must be greater than zero".to_string());
        }

        if self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Configuration for the cache warmer.
#[derive(Debug, Clone)]
pub struct WarmConfig {
    /// Number of most-accessed entities requested from the remote (default: 20)
    pub top_n: usize,

    /// Fetches in flight at once (default: 4)
    pub max_concurrent_fetches: usize,

    /// Timeout for a single fetch (default: 10s)
    pub fetch_timeout: Duration,

    /// Priority given to favorites (default: 9)
    pub favorite_priority: u8,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            top_n: 20,
            max_concurrent_fetches: 4,
            fetch_timeout: Duration::from_secs(10),
            favorite_priority: 9,
        }
    }
}

impl WarmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, count: usize) -> Self {
        self.max_concurrent_fetches = count;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_fetches == 0 {
            return Err("max_concurrent_fetches must be at least 1".to_string());
        }

        if self.fetch_timeout.is_zero() {
            return Err("fetch_timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}
