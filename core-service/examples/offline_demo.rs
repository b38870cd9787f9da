//! Offline cache and sync walkthrough
//!
//! Starts the service offline against an in-process remote, queues some
//! recipe activity, then reconnects and lets the background sync drain it.
//!
//! Run with:
//! ```bash
//! cargo run -p core-service --example offline_demo
//!
//! # JSON logs
//! cargo run -p core-service --example offline_demo -- json
//! ```

use anyhow::Context;
use async_trait::async_trait;
use bridge_desktop::ManualNetworkMonitor;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::remote::{RemoteClient, WarmCandidate};
use bridge_traits::time::LogLevel;
use bytes::Bytes;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_service::{CacheEntryType, CoreConfig, FeatureFlags, OfflineDataService};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Remote store kept in memory.
#[derive(Default)]
struct InMemoryRemote {
    records: Mutex<HashMap<(String, String), Value>>,
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn upsert(&self, collection: &str, entity_id: &str, payload: &Value) -> BridgeResult<()> {
        self.records
            .lock()
            .insert((collection.to_string(), entity_id.to_string()), payload.clone());
        Ok(())
    }

    async fn delete(&self, collection: &str, entity_id: &str) -> BridgeResult<()> {
        self.records
            .lock()
            .remove(&(collection.to_string(), entity_id.to_string()));
        Ok(())
    }

    async fn fetch(&self, kind: &str, entity_id: &str) -> BridgeResult<Option<Bytes>> {
        Ok(Some(Bytes::from(format!(
            r#"{{"kind":"{kind}","id":"{entity_id}"}}"#
        ))))
    }

    async fn warm_candidates(&self, _limit: usize) -> BridgeResult<Vec<WarmCandidate>> {
        Ok(vec![
            WarmCandidate::new("recipe", "shakshuka").favorite(),
            WarmCandidate::new("recipe", "ramen").with_access_count(14),
            WarmCandidate::new("image", "ramen-hero").with_access_count(9),
        ])
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = match std::env::args().nth(1).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };
    init_logging(
        LoggingConfig::default()
            .with_format(format)
            .with_level(LogLevel::Debug)
            .with_filter("core_cache=debug,core_sync=debug,core_service=info"),
    )
    .context("failed to initialize logging")?;

    let remote = Arc::new(InMemoryRemote::default());
    let network = Arc::new(ManualNetworkMonitor::new(false));

    let config = CoreConfig::builder()
        .cache_size_mb(8)
        .sync_interval(Duration::from_secs(60))
        .remote_client(remote.clone())
        .network_monitor(network.clone())
        .features(FeatureFlags {
            enable_warm_on_startup: false,
            ..FeatureFlags::default()
        })
        .build()?;

    let service = OfflineDataService::builder(config).build().await?;
    service.init().await?;

    info!("=== Offline ===");
    service
        .put(
            CacheEntryType::Recipe,
            "shakshuka",
            Bytes::from_static(br#"{"title":"Shakshuka"}"#),
            8,
        )
        .await?;
    service.record_recipe_access("shakshuka").await?;
    service.set_favorite("shakshuka", true).await?;

    let status = service.get_status().await?;
    info!(pending = status.pending_operations, online = status.is_online, "Queued while offline");

    info!("=== Back online ===");
    network.set_online(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.get_status().await.map(|s| s.pending_operations).unwrap_or(0) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .context("queue did not drain")?;
    info!(records = remote.records.lock().len(), "Remote store updated");

    let report = service.warm().await?;
    info!(warmed = report.warmed, skipped = report.skipped, "Cache warmed");

    let stats = service.get_stats();
    info!(
        items = stats.stats.total_items,
        bytes = stats.stats.total_size,
        hit_rate = stats.hit_rate,
        "Cache stats"
    );

    service.cleanup().await?;
    info!("=== Demo Complete ===");
    Ok(())
}
