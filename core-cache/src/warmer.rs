//! Cache warming
//!
//! Pre-seeds the store with favorites and frequently accessed entities so the
//! app has them when it goes offline.

use crate::config::WarmConfig;
use crate::error::{CacheError, Result};
use crate::metadata::CacheEntryType;
use crate::store::CacheStore;
use bridge_traits::network::NetworkMonitor;
use bridge_traits::remote::{RemoteClient, WarmCandidate};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of one warm pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmReport {
    /// Entries fetched and stored
    pub warmed: usize,
    /// Entries already cached and fresh, or gone from the remote
    pub skipped: usize,
    /// Entries that failed to fetch or store
    pub errors: usize,
}

enum Outcome {
    Warmed,
    Skipped,
    Failed,
}

struct WarmTarget {
    entry_type: CacheEntryType,
    entity_id: String,
    priority: u8,
}

/// Resets the single-flight flag when a pass ends, even by cancellation.
struct WarmingGuard<'a>(&'a AtomicBool);

impl Drop for WarmingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CacheWarmer {
    store: Arc<CacheStore>,
    remote: Arc<dyn RemoteClient>,
    network: Arc<dyn NetworkMonitor>,
    config: WarmConfig,
    warming: AtomicBool,
    event_bus: Option<Arc<EventBus>>,
}

impl CacheWarmer {
    pub fn new(
        store: Arc<CacheStore>,
        remote: Arc<dyn RemoteClient>,
        network: Arc<dyn NetworkMonitor>,
        config: WarmConfig,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::InvalidConfig)?;

        Ok(Self {
            store,
            remote,
            network,
            config,
            warming: AtomicBool::new(false),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn is_warming(&self) -> bool {
        self.warming.load(Ordering::SeqCst)
    }

    /// Fetch and cache favorites and the most accessed entities.
    ///
    /// Returns an empty report when offline. Per-item failures are counted in
    /// the report; only a failure to list candidates is returned as an error.
    ///
    /// # Errors
    ///
    /// - [`CacheError::WarmInProgress`] if another pass is running
    /// - [`CacheError::Remote`] if the candidate list cannot be fetched
    #[instrument(skip(self))]
    pub async fn warm(&self) -> Result<WarmReport> {
        if self
            .warming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CacheError::WarmInProgress);
        }
        let _guard = WarmingGuard(&self.warming);

        if !self.network.is_connected().await {
            debug!("Offline, skipping cache warm");
            return Ok(WarmReport::default());
        }

        let candidates = self.remote.warm_candidates(self.config.top_n).await?;
        let mut report = WarmReport::default();
        let targets = self.rank(candidates, &mut report);

        info!(candidates = targets.len(), "Warming cache");

        let outcomes: Vec<Outcome> = stream::iter(targets)
            .map(|target| self.warm_one(target))
            .buffer_unordered(self.config.max_concurrent_fetches)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Warmed => report.warmed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.errors += 1,
            }
        }

        info!(
            warmed = report.warmed,
            skipped = report.skipped,
            errors = report.errors,
            "Cache warm completed"
        );

        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(CacheEvent::WarmCompleted {
                warmed: report.warmed,
                skipped: report.skipped,
                errors: report.errors,
            }));
        }

        Ok(report)
    }

    /// Dedupe candidates and assign priorities: favorites first, then the
    /// rest by access count split into terciles (8, 7, 6).
    fn rank(&self, candidates: Vec<WarmCandidate>, report: &mut WarmReport) -> Vec<WarmTarget> {
        let mut unique: HashMap<(CacheEntryType, String), WarmCandidate> = HashMap::new();

        for candidate in candidates {
            let entry_type = match candidate.kind.parse::<CacheEntryType>() {
                Ok(entry_type) => entry_type,
                Err(_) => {
                    warn!(kind = %candidate.kind, "Unknown warm candidate kind");
                    report.errors += 1;
                    continue;
                }
            };

            let slot = unique
                .entry((entry_type, candidate.entity_id.clone()))
                .or_insert_with(|| candidate.clone());
            slot.is_favorite |= candidate.is_favorite;
            slot.access_count = slot.access_count.max(candidate.access_count);
        }

        let (favorites, mut others): (Vec<_>, Vec<_>) =
            unique.into_iter().partition(|(_, c)| c.is_favorite);

        others.sort_by(|(a_key, a), (b_key, b)| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a_key.1.cmp(&b_key.1))
        });

        let mut targets = Vec::new();
        for ((entry_type, entity_id), _) in favorites {
            targets.push(WarmTarget {
                entry_type,
                entity_id,
                priority: self.config.favorite_priority,
            });
        }

        let len = others.len();
        for (idx, ((entry_type, entity_id), _)) in others.into_iter().enumerate() {
            let priority = match idx * 3 / len {
                0 => 8,
                1 => 7,
                _ => 6,
            };
            targets.push(WarmTarget {
                entry_type,
                entity_id,
                priority,
            });
        }

        targets.retain(|target| {
            let key = self.store.key_for(target.entry_type, &target.entity_id);
            if self.store.contains(&key) {
                report.skipped += 1;
                false
            } else {
                true
            }
        });

        targets
    }

    async fn warm_one(&self, target: WarmTarget) -> Outcome {
        let kind = target.entry_type.as_str();
        let fetched = tokio::time::timeout(
            self.config.fetch_timeout,
            self.remote.fetch(kind, &target.entity_id),
        )
        .await;

        let payload = match fetched {
            Ok(Ok(Some(payload))) => payload,
            Ok(Ok(None)) => {
                debug!(kind, entity_id = %target.entity_id, "Warm candidate no longer exists");
                return Outcome::Skipped;
            }
            Ok(Err(e)) => {
                warn!(kind, entity_id = %target.entity_id, error = %e, "Warm fetch failed");
                return Outcome::Failed;
            }
            Err(_) => {
                warn!(kind, entity_id = %target.entity_id, "Warm fetch timed out");
                return Outcome::Failed;
            }
        };

        match self
            .store
            .put(&target.entity_id, target.entry_type, payload, target.priority)
            .await
        {
            Ok(_) => Outcome::Warmed,
            Err(e) => {
                warn!(kind, entity_id = %target.entity_id, error = %e, "Failed to cache warmed entry");
                Outcome::Failed
            }
        }
    }
}
