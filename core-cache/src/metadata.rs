//! # Metadata Index
//!
//! In-memory bookkeeping for every resident payload: size, timestamps,
//! access statistics, priority and expiry. The index is the source of truth
//! for admission and eviction; the repository keeps one durable row per entry
//! so the index can be rebuilt at startup.
//!
//! Bytes admitted for writes that have not committed yet are tracked as
//! `reserved` so concurrent puts cannot overshoot the budget.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Priority for ordinary feature writes.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Kind of payload held by an entry; selects the default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEntryType {
    Image,
    Recipe,
    Data,
}

impl CacheEntryType {
    pub const ALL: [CacheEntryType; 3] = [
        CacheEntryType::Image,
        CacheEntryType::Recipe,
        CacheEntryType::Data,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEntryType::Image => "image",
            CacheEntryType::Recipe => "recipe",
            CacheEntryType::Data => "data",
        }
    }
}

impl fmt::Display for CacheEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheEntryType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(CacheEntryType::Image),
            "recipe" => Ok(CacheEntryType::Recipe),
            "data" => Ok(CacheEntryType::Data),
            other => Err(CacheError::UnknownEntryType(other.to_string())),
        }
    }
}

/// Clamp a caller-supplied priority into `1..=10`.
pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Bookkeeping for one resident payload. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub key: String,
    pub entry_type: CacheEntryType,
    /// Payload length in bytes
    pub size: u64,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
    pub expires_at: i64,
    pub priority: u8,
}

impl CacheEntryMetadata {
    pub fn new(
        key: impl Into<String>,
        entry_type: CacheEntryType,
        size: u64,
        now: i64,
        ttl_millis: i64,
        priority: u8,
    ) -> Self {
        Self {
            key: key.into(),
            entry_type,
            size,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: now.saturating_add(ttl_millis.max(1)),
            priority: clamp_priority(priority),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn record_access(&mut self, now: i64) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Ordering key for pressure eviction: lowest priority first, then least
    /// recently accessed, then oldest.
    pub fn eviction_rank(&self) -> (u8, i64, i64) {
        (self.priority, self.last_accessed, self.created_at)
    }
}

/// Count and bytes of resident entries of one type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeUsage {
    pub count: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
pub struct MetadataIndex {
    entries: HashMap<String, CacheEntryMetadata>,
    total_size: u64,
    reserved: u64,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows.
    pub fn from_entries(entries: impl IntoIterator<Item = CacheEntryMetadata>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntryMetadata> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntryMetadata> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace; returns the replaced entry.
    pub fn insert(&mut self, entry: CacheEntryMetadata) -> Option<CacheEntryMetadata> {
        self.total_size += entry.size;
        let previous = self.entries.insert(entry.key.clone(), entry);
        if let Some(old) = &previous {
            self.total_size -= old.size;
        }
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntryMetadata> {
        let removed = self.entries.remove(key)?;
        self.total_size -= removed.size;
        Some(removed)
    }

    /// Remove everything, returning the removed entries.
    pub fn drain(&mut self) -> Vec<CacheEntryMetadata> {
        self.total_size = 0;
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of resident entry sizes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes admitted for in-flight writes.
    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn reserve(&mut self, bytes: u64) {
        self.reserved += bytes;
    }

    pub fn release(&mut self, bytes: u64) {
        self.reserved = self.reserved.saturating_sub(bytes);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntryMetadata> {
        self.entries.values()
    }

    /// Entries sorted in eviction order.
    pub fn eviction_order(&self) -> Vec<&CacheEntryMetadata> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.eviction_rank()
                .cmp(&b.eviction_rank())
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }

    pub fn usage_by_type(&self) -> HashMap<CacheEntryType, TypeUsage> {
        let mut usage: HashMap<CacheEntryType, TypeUsage> = CacheEntryType::ALL
            .iter()
            .map(|entry_type| (*entry_type, TypeUsage::default()))
            .collect();

        for entry in self.entries.values() {
            let slot = usage.entry(entry.entry_type).or_default();
            slot.count += 1;
            slot.bytes += entry.size;
        }

        usage
    }
}
