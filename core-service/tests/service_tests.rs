//! Integration tests for the offline data service lifecycle

use async_trait::async_trait;
use bridge_desktop::ManualNetworkMonitor;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::remote::{RemoteClient, WarmCandidate};
use bridge_traits::time::ManualClock;
use bytes::Bytes;
use core_runtime::events::CacheEvent;
use core_service::{
    CacheEntryType, CoreConfig, CoreEvent, FeatureFlags, OfflineDataService, SyncAction,
    SyncOperationType,
};
use mockall::mock;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const START: i64 = 1_700_000_000_000;

mock! {
    Remote {}

    #[async_trait]
    impl RemoteClient for Remote {
        async fn upsert(&self, collection: &str, entity_id: &str, payload: &Value) -> BridgeResult<()>;
        async fn delete(&self, collection: &str, entity_id: &str) -> BridgeResult<()>;
        async fn fetch(&self, kind: &str, entity_id: &str) -> BridgeResult<Option<Bytes>>;
        async fn warm_candidates(&self, limit: usize) -> BridgeResult<Vec<WarmCandidate>>;
    }
}

async fn service(remote: MockRemote, features: FeatureFlags) -> OfflineDataService {
    let config = CoreConfig::builder()
        .cache_size_bytes(64 * 1024)
        .remote_client(Arc::new(remote))
        .network_monitor(Arc::new(ManualNetworkMonitor::new(true)))
        .clock(Arc::new(ManualClock::new(START)))
        .features(features)
        .build()
        .unwrap();

    OfflineDataService::builder(config).build().await.unwrap()
}

async fn wait_for_empty_queue(service: &OfflineDataService) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.get_status().await.unwrap().pending_operations > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sync queue did not drain");
}

#[tokio::test]
async fn test_cache_round_trip_through_service() {
    let service = service(MockRemote::new(), FeatureFlags::manual()).await;
    service.init().await.unwrap();

    let payload = Bytes::from_static(br#"{"title":"Shakshuka"}"#);
    service
        .put(CacheEntryType::Recipe, "r-1", payload.clone(), 5)
        .await
        .unwrap();

    assert_eq!(
        service.get(CacheEntryType::Recipe, "r-1").await.unwrap(),
        Some(payload)
    );
    assert_eq!(service.get_stats().stats.total_items, 1);

    assert!(service.remove(CacheEntryType::Recipe, "r-1").await.unwrap());
    assert_eq!(service.get(CacheEntryType::Recipe, "r-1").await.unwrap(), None);

    service.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_component_configs_follow_core_config() {
    let service = service(MockRemote::new(), FeatureFlags::manual()).await;

    assert_eq!(service.cache().config().max_cache_size_bytes, 64 * 1024);
}

#[tokio::test]
async fn test_recipe_activity_reaches_remote() {
    let mut remote = MockRemote::new();
    remote
        .expect_upsert()
        .withf(|collection, entity_id, payload| {
            collection == "recipe_access"
                && entity_id == "r-1"
                && payload["accessed_at"] == Value::from(START)
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    remote
        .expect_upsert()
        .withf(|collection, entity_id, _| collection == "recipe_favorites" && entity_id == "r-1")
        .times(1)
        .returning(|_, _, _| Ok(()));
    remote
        .expect_delete()
        .withf(|collection, entity_id| collection == "recipe_favorites" && entity_id == "r-2")
        .times(1)
        .returning(|_, _| Ok(()));

    let service = service(remote, FeatureFlags::manual()).await;
    service.init().await.unwrap();

    service.record_recipe_access("r-1").await.unwrap();
    service.set_favorite("r-1", true).await.unwrap();
    service.set_favorite("r-2", false).await.unwrap();

    let result = service.perform_sync().await.unwrap();

    assert!(result.success);
    assert_eq!(result.synced_operations, 3);
    assert_eq!(service.get_status().await.unwrap().pending_operations, 0);
}

#[tokio::test]
async fn test_background_sync_drains_enqueued_operations() {
    let mut remote = MockRemote::new();
    remote.expect_upsert().returning(|_, _, _| Ok(()));

    let features = FeatureFlags {
        enable_background_sync: true,
        ..FeatureFlags::manual()
    };
    let service = service(remote, features).await;
    service.init().await.unwrap();

    service
        .enqueue(
            SyncOperationType::ChatMessage,
            "m-1",
            SyncAction::Upsert,
            serde_json::json!({"text": "What can I cook with leeks?"}),
        )
        .await
        .unwrap();

    wait_for_empty_queue(&service).await;
    service.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_startup_warm_populates_cache() {
    let mut remote = MockRemote::new();
    remote
        .expect_warm_candidates()
        .returning(|_| Ok(vec![WarmCandidate::new("recipe", "r-9").favorite()]));
    remote
        .expect_fetch()
        .returning(|_, _| Ok(Some(Bytes::from_static(b"{\"id\":\"r-9\"}"))));

    let features = FeatureFlags {
        enable_warm_on_startup: true,
        ..FeatureFlags::manual()
    };
    let service = service(remote, features).await;
    let mut events = service
        .subscribe_events()
        .filter(|event| matches!(event, CoreEvent::Cache(CacheEvent::WarmCompleted { .. })));

    service.init().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("warm did not complete")
        .unwrap();
    assert_eq!(
        event,
        CoreEvent::Cache(CacheEvent::WarmCompleted {
            warmed: 1,
            skipped: 0,
            errors: 0
        })
    );
    assert!(service
        .get(CacheEntryType::Recipe, "r-9")
        .await
        .unwrap()
        .is_some());

    service.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_makes_final_drain() {
    let mut remote = MockRemote::new();
    remote.expect_upsert().times(1).returning(|_, _, _| Ok(()));

    let service = service(remote, FeatureFlags::manual()).await;
    service.init().await.unwrap();
    service.record_recipe_access("r-3").await.unwrap();

    service.cleanup().await.unwrap();

    assert_eq!(service.get_status().await.unwrap().pending_operations, 0);
}

#[tokio::test]
async fn test_init_twice_is_harmless() {
    let service = service(MockRemote::new(), FeatureFlags::manual()).await;

    service.init().await.unwrap();
    service.init().await.unwrap();

    service.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_init_starts_background_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let mut remote = MockRemote::new();
    remote.expect_warm_candidates().returning(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    });

    let features = FeatureFlags {
        enable_warm_on_startup: true,
        ..FeatureFlags::manual()
    };
    let service = service(remote, features).await;
    let mut events = service
        .subscribe_events()
        .filter(|event| matches!(event, CoreEvent::Cache(CacheEvent::WarmCompleted { .. })));

    let (first, second) = tokio::join!(service.init(), service.init());
    first.unwrap();
    second.unwrap();

    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("warm did not complete")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    service.cleanup().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
