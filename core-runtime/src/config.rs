//! # Core Configuration Module
//!
//! Builder for the settings and collaborators the offline core needs.
//!
//! ## Required Dependencies
//!
//! - `RemoteClient` - Authenticated client for the remote store
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `NetworkMonitor` - Connectivity probe (desktop default: TCP probe)
//! - `Clock` - Time source (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, the desktop network monitor
//! is injected automatically if none is provided. Without it, mobile hosts
//! must supply a monitor fed by the platform's reachability API.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/offline.db")
//!     .cache_size_mb(100)
//!     .remote_client(Arc::new(MyRemoteClient::new()))
//!     .network_monitor(Arc::new(MyReachability::new()))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, NetworkMonitor, RemoteClient, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default cache budget: 100 MB.
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Default interval between scheduled sync drains.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Upper bound accepted for the cache budget (10 GB).
const MAX_CACHE_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite file holding cache rows and the sync queue.
    /// `None` keeps everything in memory (tests, ephemeral sessions).
    pub database_path: Option<PathBuf>,

    /// Maximum total payload bytes held by the cache
    pub cache_size_bytes: u64,

    /// Interval between scheduled sync drains
    pub sync_interval: Duration,

    pub remote_client: Arc<dyn RemoteClient>,
    pub network_monitor: Arc<dyn NetworkMonitor>,
    pub clock: Arc<dyn Clock>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_size_bytes", &self.cache_size_bytes)
            .field("sync_interval", &self.sync_interval)
            .field("remote_client", &"RemoteClient { ... }")
            .field("network_monitor", &"NetworkMonitor { ... }")
            .field("clock", &"Clock { ... }")
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags for the background tasks started by `init()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run the periodic sync scheduler and connectivity watcher
    pub enable_background_sync: bool,

    /// Warm the cache from the remote store during init
    pub enable_warm_on_startup: bool,

    /// Periodically sweep expired entries
    pub enable_periodic_cleanup: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_sync: true,
            enable_warm_on_startup: true,
            enable_periodic_cleanup: true,
        }
    }
}

impl FeatureFlags {
    /// Every background task disabled; operations run only when called.
    pub fn manual() -> Self {
        Self {
            enable_background_sync: false,
            enable_warm_on_startup: false,
            enable_periodic_cleanup: false,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - Database path is not empty when provided
    /// - Cache size is > 0 and <= 10 GB
    /// - Sync interval is at least one second
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if self.cache_size_bytes == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.cache_size_bytes > MAX_CACHE_SIZE_BYTES {
            return Err(Error::Config(
                "Cache size exceeds maximum of 10 GB".to_string(),
            ));
        }

        if self.sync_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Sync interval must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }
}

fn remote_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "RemoteClient".to_string(),
        message: "RemoteClient implementation is required to sync queued operations \
                 and warm the cache. Inject the host's authenticated remote store client."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor() -> Result<Arc<dyn NetworkMonitor>> {
    use bridge_desktop::DesktopNetworkMonitor;

    let monitor: Arc<dyn NetworkMonitor> = Arc::new(DesktopNetworkMonitor::new());
    Ok(monitor)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor() -> Result<Arc<dyn NetworkMonitor>> {
    Err(Error::CapabilityMissing {
        capability: "NetworkMonitor".to_string(),
        message: "NetworkMonitor implementation is required to defer sync while offline. \
                 Desktop: enable the 'desktop-shims' feature to use the default TCP probe. \
                 Mobile: forward platform reachability through ManualNetworkMonitor."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_size_bytes: Option<u64>,
    sync_interval: Option<Duration>,
    remote_client: Option<Arc<dyn RemoteClient>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    features: Option<FeatureFlags>,
}

impl CoreConfigBuilder {
    /// Persist cache and queue state to this SQLite file.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn cache_size_bytes(mut self, bytes: u64) -> Self {
        self.cache_size_bytes = Some(bytes);
        self
    }

    pub fn cache_size_mb(mut self, size_mb: u64) -> Self {
        self.cache_size_bytes = Some(size_mb * 1024 * 1024);
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    pub fn remote_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.remote_client = Some(client);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    /// Override the time source (tests use `ManualClock`).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = Some(features);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// Fails with `Error::CapabilityMissing` when a required collaborator is
    /// absent and no platform default applies.
    pub fn build(self) -> Result<CoreConfig> {
        let remote_client = self.remote_client.ok_or_else(remote_client_missing_error)?;

        let network_monitor = match self.network_monitor {
            Some(monitor) => monitor,
            None => provide_default_network_monitor()?,
        };

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let config = CoreConfig {
            database_path: self.database_path,
            cache_size_bytes: self.cache_size_bytes.unwrap_or(DEFAULT_CACHE_SIZE_BYTES),
            sync_interval: self.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL),
            remote_client,
            network_monitor,
            clock,
            features: self.features.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::ManualNetworkMonitor;
    use bridge_traits::{error::Result as BridgeResult, WarmCandidate};
    use bytes::Bytes;

    struct NoopRemote;

    #[async_trait]
    impl RemoteClient for NoopRemote {
        async fn upsert(
            &self,
            _collection: &str,
            _entity_id: &str,
            _payload: &serde_json::Value,
        ) -> BridgeResult<()> {
            Ok(())
        }

        async fn delete(&self, _collection: &str, _entity_id: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn fetch(&self, _kind: &str, _entity_id: &str) -> BridgeResult<Option<Bytes>> {
            Ok(None)
        }

        async fn warm_candidates(&self, _limit: usize) -> BridgeResult<Vec<WarmCandidate>> {
            Ok(Vec::new())
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .remote_client(Arc::new(NoopRemote))
            .network_monitor(Arc::new(ManualNetworkMonitor::new(true)))
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.database_path, None);
        assert_eq!(config.cache_size_bytes, DEFAULT_CACHE_SIZE_BYTES);
        assert_eq!(config.sync_interval, DEFAULT_SYNC_INTERVAL);
        assert_eq!(config.features, FeatureFlags::default());
    }

    #[test]
    fn test_builder_requires_remote_client() {
        let result = CoreConfig::builder()
            .network_monitor(Arc::new(ManualNetworkMonitor::new(true)))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "RemoteClient")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_network_monitor_without_shims() {
        let result = CoreConfig::builder()
            .remote_client(Arc::new(NoopRemote))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("NetworkMonitor"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_builder_uses_desktop_network_monitor() {
        let result = CoreConfig::builder()
            .remote_client(Arc::new(NoopRemote))
            .build();

        assert!(result.is_ok());
    }

    #[test]
    fn test_cache_size_mb() {
        let config = builder().cache_size_mb(5).build().unwrap();
        assert_eq!(config.cache_size_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_validation_rejects_zero_cache() {
        let err = builder().cache_size_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_validation_rejects_oversized_cache() {
        let err = builder()
            .cache_size_bytes(MAX_CACHE_SIZE_BYTES + 1)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("maximum"));
    }

    #[test]
    fn test_validation_rejects_short_interval() {
        let err = builder()
            .sync_interval(Duration::from_millis(10))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Sync interval"));
    }

    #[test]
    fn test_validation_rejects_empty_path() {
        let err = builder().database_path("").build().unwrap_err();
        assert!(err.to_string().contains("Database path"));
    }

    #[test]
    fn test_manual_features() {
        let config = builder().features(FeatureFlags::manual()).build().unwrap();
        assert!(!config.features.enable_background_sync);
        assert!(!config.features.enable_warm_on_startup);
        assert!(!config.features.enable_periodic_cleanup);
    }

    #[test]
    fn test_debug_hides_collaborators() {
        let config = builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("RemoteClient { ... }"));
    }
}
