//! Offline data service façade.
//!
//! This crate wires the cache store, cache warmer and sync engine over one
//! SQLite pool and owns their background tasks. Hosts build a
//! [`CoreConfig`], hand it to [`OfflineDataService::builder`], then drive the
//! lifecycle explicitly:
//!
//! ```ignore
//! use core_service::{CoreConfig, OfflineDataService};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/offline.db")
//!     .remote_client(Arc::new(MyRemoteClient::new()))
//!     .build()?;
//!
//! let service = OfflineDataService::builder(config).build().await?;
//! service.init().await?;
//! // ...
//! service.cleanup().await?;
//! ```
//!
//! Desktop apps typically keep the `desktop-shims` feature enabled so the
//! TCP connectivity probe from `bridge-desktop` is injected by default.

pub mod error;

pub use error::{CoreError, Result};

pub use core_cache::{
    CacheConfig, CacheEntryType, CacheStatsReport, CacheStore, CacheWarmer, WarmConfig,
    WarmReport,
};
pub use core_runtime::{CoreConfig, CoreConfigBuilder, CoreEvent, EventBus, EventStream, FeatureFlags};
pub use core_sync::{
    SyncAction, SyncConfig, SyncEngine, SyncOperation, SyncOperationType, SyncResult, SyncStatus,
};

use bridge_traits::time::Clock;
use bytes::Bytes;
use core_cache::SqliteCacheRepository;
use core_runtime::db::{create_pool, DatabaseConfig};
use core_sync::{SqliteSyncQueueRepository, SyncQueue};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Builder for [`OfflineDataService`].
///
/// Component configs default from the [`CoreConfig`]: the cache budget comes
/// from `cache_size_bytes` and the drain interval from `sync_interval`.
pub struct ServiceBuilder {
    core: CoreConfig,
    cache: Option<CacheConfig>,
    warm: WarmConfig,
    sync: Option<SyncConfig>,
    event_bus: Option<Arc<EventBus>>,
}

impl ServiceBuilder {
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn warm_config(mut self, config: WarmConfig) -> Self {
        self.warm = config;
        self
    }

    pub fn sync_config(mut self, config: SyncConfig) -> Self {
        self.sync = Some(config);
        self
    }

    /// Share an existing event bus instead of creating one.
    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Open the database, create the queue table and construct every
    /// component. Nothing is loaded or started until [`OfflineDataService::init`].
    pub async fn build(self) -> Result<OfflineDataService> {
        let core = self.core;

        let database = match &core.database_path {
            Some(path) => DatabaseConfig::new(path.clone()),
            None => DatabaseConfig::in_memory(),
        };
        let pool = create_pool(database).await?;

        let cache_config = self
            .cache
            .unwrap_or_else(|| CacheConfig::default().with_max_size(core.cache_size_bytes));
        let sync_config = self
            .sync
            .unwrap_or_else(|| SyncConfig::default().with_sync_interval(core.sync_interval));
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(DEFAULT_EVENT_CAPACITY)));

        let cache = Arc::new(
            CacheStore::new(
                cache_config,
                Arc::new(SqliteCacheRepository::new(pool.clone())),
                Arc::clone(&core.clock),
            )?
            .with_event_bus(Arc::clone(&event_bus)),
        );

        let warmer = Arc::new(
            CacheWarmer::new(
                Arc::clone(&cache),
                Arc::clone(&core.remote_client),
                Arc::clone(&core.network_monitor),
                self.warm,
            )?
            .with_event_bus(Arc::clone(&event_bus)),
        );

        let queue_repository = SqliteSyncQueueRepository::new(pool);
        queue_repository.initialize().await?;
        let queue = Arc::new(SyncQueue::new(
            Arc::new(queue_repository),
            Arc::clone(&core.clock),
        ));

        let sync = Arc::new(
            SyncEngine::new(
                sync_config,
                queue,
                Arc::clone(&core.remote_client),
                Arc::clone(&core.network_monitor),
                Arc::clone(&core.clock),
            )?
            .with_event_bus(Arc::clone(&event_bus)),
        );

        Ok(OfflineDataService {
            cache,
            warmer,
            sync,
            event_bus,
            clock: core.clock,
            features: core.features,
            started: AtomicBool::new(false),
            background: Mutex::new(None),
        })
    }
}

struct Background {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Primary façade exposed to host applications.
pub struct OfflineDataService {
    cache: Arc<CacheStore>,
    warmer: Arc<CacheWarmer>,
    sync: Arc<SyncEngine>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    features: FeatureFlags,
    /// Claimed by the first `init` before it awaits anything.
    started: AtomicBool,
    background: Mutex<Option<Background>>,
}

impl OfflineDataService {
    pub fn builder(config: CoreConfig) -> ServiceBuilder {
        ServiceBuilder {
            core: config,
            cache: None,
            warm: WarmConfig::default(),
            sync: None,
            event_bus: None,
        }
    }

    /// Load persisted cache state and start the background tasks enabled in
    /// [`FeatureFlags`]. Calling `init` twice, even concurrently, starts
    /// everything once.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Offline data service already initialized");
            return Ok(());
        }

        if let Err(e) = self.cache.init().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if self.features.enable_background_sync {
            self.sync.start().await;
        }
        if self.features.enable_warm_on_startup {
            handles.push(self.spawn_startup_warm(cancel.clone()));
        }
        if self.features.enable_periodic_cleanup {
            handles.push(self.spawn_periodic_cleanup(cancel.clone()));
        }

        *self.background.lock() = Some(Background { cancel, handles });

        info!(features = ?self.features, "Offline data service initialized");
        Ok(())
    }

    fn spawn_startup_warm(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let warmer = Arc::clone(&self.warmer);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Startup warm cancelled"),
                result = warmer.warm() => match result {
                    Ok(report) => debug!(warmed = report.warmed, errors = report.errors, "Startup warm finished"),
                    Err(e) => warn!(error = %e, "Startup warm failed"),
                }
            }
        })
    }

    fn spawn_periodic_cleanup(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.config().cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = cache.perform_cleanup().await {
                    warn!(error = %e, "Periodic cache cleanup failed");
                }
                if let Err(e) = cache.flush().await {
                    warn!(error = %e, "Failed to flush cache stats");
                }
            }

            debug!("Periodic cleanup stopped");
        })
    }

    /// Stop background tasks, make one best-effort drain and flush stats.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<()> {
        let background = self.background.lock().take();

        if let Some(background) = background {
            background.cancel.cancel();
            for handle in background.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        }

        self.sync.cleanup().await;
        self.started.store(false, Ordering::SeqCst);
        self.cache.flush().await?;

        info!("Offline data service stopped");
        Ok(())
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn warmer(&self) -> &Arc<CacheWarmer> {
        &self.warmer
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    /// Cache `payload` for `(entry_type, id)` and return its key.
    pub async fn put(
        &self,
        entry_type: CacheEntryType,
        id: &str,
        payload: Bytes,
        priority: u8,
    ) -> Result<String> {
        Ok(self.cache.put(id, entry_type, payload, priority).await?)
    }

    pub async fn get(&self, entry_type: CacheEntryType, id: &str) -> Result<Option<Bytes>> {
        let key = self.cache.key_for(entry_type, id);
        Ok(self.cache.get(&key).await?)
    }

    pub async fn remove(&self, entry_type: CacheEntryType, id: &str) -> Result<bool> {
        let key = self.cache.key_for(entry_type, id);
        Ok(self.cache.remove(&key).await?)
    }

    pub async fn warm(&self) -> Result<WarmReport> {
        Ok(self.warmer.warm().await?)
    }

    pub fn get_stats(&self) -> CacheStatsReport {
        self.cache.get_stats()
    }

    pub async fn clear_cache(&self) -> Result<usize> {
        Ok(self.cache.clear().await?)
    }

    pub async fn perform_cleanup(&self) -> Result<usize> {
        Ok(self.cache.perform_cleanup().await?)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    pub async fn enqueue(
        &self,
        op_type: SyncOperationType,
        entity_id: &str,
        action: SyncAction,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        Ok(self.sync.enqueue(op_type, entity_id, action, payload).await?)
    }

    /// Queue an access record for `recipe_id` stamped with the current time.
    pub async fn record_recipe_access(&self, recipe_id: &str) -> Result<SyncOperation> {
        let accessed_at = self.clock.unix_timestamp_millis();
        self.enqueue(
            SyncOperationType::RecipeAccess,
            recipe_id,
            SyncAction::Upsert,
            json!({ "recipe_id": recipe_id, "accessed_at": accessed_at }),
        )
        .await
    }

    /// Queue a favorite toggle. Unfavoriting deletes the remote record.
    pub async fn set_favorite(&self, recipe_id: &str, favorite: bool) -> Result<SyncOperation> {
        let (action, payload) = if favorite {
            let updated_at = self.clock.unix_timestamp_millis();
            (
                SyncAction::Upsert,
                json!({ "recipe_id": recipe_id, "updated_at": updated_at }),
            )
        } else {
            (SyncAction::Delete, serde_json::Value::Null)
        };

        self.enqueue(SyncOperationType::RecipeFavorite, recipe_id, action, payload)
            .await
    }

    pub async fn perform_sync(&self) -> Result<SyncResult> {
        Ok(self.sync.perform_sync().await?)
    }

    pub async fn get_status(&self) -> Result<SyncStatus> {
        Ok(self.sync.get_status().await?)
    }
}
