//! Integration tests for the sync engine
//!
//! These tests verify the drain workflow end to end against an in-memory
//! SQLite queue:
//! - Order preservation per entity across failures
//! - Retry accounting and permanent drops
//! - Offline skips and reconnect-triggered drains
//! - Backoff on rejected credentials
//! - Durability across restarts

use async_trait::async_trait;
use bridge_desktop::ManualNetworkMonitor;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::remote::{RemoteClient, WarmCandidate};
use bridge_traits::time::{Clock, ManualClock};
use bytes::Bytes;
use core_runtime::db::create_test_pool;
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent, SyncEvent};
use core_sync::{
    SkipReason, SqliteSyncQueueRepository, SyncAction, SyncConfig, SyncEngine, SyncOperationType,
    SyncQueue,
};
use mockall::mock;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const START: i64 = 1_700_000_000_000;

// ============================================================================
// Fake Remote
// ============================================================================

/// In-memory remote store that records every apply.
#[derive(Default)]
struct FakeRemote {
    records: Mutex<HashMap<(String, String), Value>>,
    applied: Mutex<Vec<(String, Value)>>,
    failures: Mutex<HashMap<String, u32>>,
    unauthorized: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    fn fail_times(&self, entity_id: &str, times: u32) {
        self.failures.lock().insert(entity_id.to_string(), times);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    fn record(&self, collection: &str, entity_id: &str) -> Option<Value> {
        self.records
            .lock()
            .get(&(collection.to_string(), entity_id.to_string()))
            .cloned()
    }

    fn applied_payloads(&self) -> Vec<Value> {
        self.applied.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    async fn before_apply(&self, entity_id: &str) -> BridgeResult<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(BridgeError::Unauthorized("token expired".to_string()));
        }

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(entity_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BridgeError::Network("connection reset".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn upsert(&self, collection: &str, entity_id: &str, payload: &Value) -> BridgeResult<()> {
        self.before_apply(entity_id).await?;
        self.records
            .lock()
            .insert((collection.to_string(), entity_id.to_string()), payload.clone());
        self.applied
            .lock()
            .push((entity_id.to_string(), payload.clone()));
        Ok(())
    }

    async fn delete(&self, collection: &str, entity_id: &str) -> BridgeResult<()> {
        self.before_apply(entity_id).await?;
        self.records
            .lock()
            .remove(&(collection.to_string(), entity_id.to_string()));
        self.applied.lock().push((entity_id.to_string(), Value::Null));
        Ok(())
    }

    async fn fetch(&self, _kind: &str, _entity_id: &str) -> BridgeResult<Option<Bytes>> {
        Ok(None)
    }

    async fn warm_candidates(&self, _limit: usize) -> BridgeResult<Vec<WarmCandidate>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: Arc<SyncEngine>,
    queue: Arc<SyncQueue>,
    remote: Arc<FakeRemote>,
    network: Arc<ManualNetworkMonitor>,
    clock: Arc<ManualClock>,
    pool: SqlitePool,
}

async fn open_queue(pool: &SqlitePool, clock: Arc<ManualClock>) -> Arc<SyncQueue> {
    let repository = SqliteSyncQueueRepository::new(pool.clone());
    repository.initialize().await.unwrap();
    Arc::new(SyncQueue::new(Arc::new(repository), clock))
}

async fn harness_with(config: SyncConfig, online: bool, bus: Option<Arc<EventBus>>) -> Harness {
    let pool = create_test_pool().await.unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let queue = open_queue(&pool, clock.clone()).await;
    let remote = Arc::new(FakeRemote::default());
    let network = Arc::new(ManualNetworkMonitor::new(online));

    let mut engine = SyncEngine::new(
        config,
        queue.clone(),
        remote.clone(),
        network.clone(),
        clock.clone(),
    )
    .unwrap();
    if let Some(bus) = bus {
        engine = engine.with_event_bus(bus);
    }

    Harness {
        engine: Arc::new(engine),
        queue,
        remote,
        network,
        clock,
        pool,
    }
}

async fn harness(online: bool) -> Harness {
    harness_with(SyncConfig::default(), online, None).await
}

async fn enqueue_favorite(h: &Harness, entity_id: &str, payload: Value) {
    h.engine
        .enqueue(
            SyncOperationType::RecipeFavorite,
            entity_id,
            SyncAction::Upsert,
            payload,
        )
        .await
        .unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_later_write_for_entity_wins() {
    let h = harness(true).await;
    enqueue_favorite(&h, "r-1", json!({"favorite": true, "rev": 1})).await;
    enqueue_favorite(&h, "r-1", json!({"favorite": false, "rev": 2})).await;

    let result = h.engine.drain().await.unwrap();

    assert!(result.success);
    assert_eq!(result.synced_operations, 2);
    assert_eq!(
        h.remote.record("recipe_favorites", "r-1"),
        Some(json!({"favorite": false, "rev": 2}))
    );
    assert_eq!(
        h.remote.applied_payloads(),
        vec![
            json!({"favorite": true, "rev": 1}),
            json!({"favorite": false, "rev": 2})
        ]
    );
}

#[tokio::test]
async fn test_failed_entity_keeps_order_across_drains() {
    let h = harness(true).await;
    enqueue_favorite(&h, "r-1", json!("P1")).await;
    enqueue_favorite(&h, "r-2", json!("other")).await;
    enqueue_favorite(&h, "r-1", json!("P2")).await;
    h.remote.fail_times("r-1", 1);

    let first = h.engine.perform_sync().await.unwrap();

    assert!(!first.success);
    assert_eq!(first.synced_operations, 1);
    assert_eq!(first.failed_operations, 1);
    assert!(!first.errors[0].permanent);
    assert_eq!(h.remote.record("recipe_favorites", "r-1"), None);
    assert_eq!(h.queue.len().await.unwrap(), 2);

    let second = h.engine.perform_sync().await.unwrap();

    assert!(second.success);
    assert_eq!(second.synced_operations, 2);
    assert_eq!(h.remote.record("recipe_favorites", "r-1"), Some(json!("P2")));
    assert_eq!(
        h.remote.applied_payloads(),
        vec![json!("other"), json!("P1"), json!("P2")]
    );
}

#[tokio::test]
async fn test_offline_operations_drain_after_reconnect() {
    let h = harness(false).await;
    for i in 0..5 {
        h.engine
            .enqueue(
                SyncOperationType::RecipeAccess,
                &format!("r-{i}"),
                SyncAction::Upsert,
                json!({"accessed_at": START + i}),
            )
            .await
            .unwrap();
    }

    let offline = h.engine.perform_sync().await.unwrap();
    assert_eq!(offline.skipped, Some(SkipReason::Offline));
    assert_eq!(h.queue.len().await.unwrap(), 5);

    h.network.set_online(true);
    let result = h.engine.perform_sync().await.unwrap();

    assert!(result.success);
    assert_eq!(result.synced_operations, 5);
    assert_eq!(result.failed_operations, 0);
    assert!(result.errors.is_empty());
    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_operation_dropped_after_three_failures() {
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let h = harness_with(SyncConfig::default(), true, Some(bus)).await;
    enqueue_favorite(&h, "bad", json!({})).await;
    h.remote.fail_times("bad", u32::MAX);

    for attempt in 1..=2 {
        let result = h.engine.perform_sync().await.unwrap();
        assert_eq!(result.failed_operations, 1);
        assert!(!result.errors[0].permanent, "attempt {attempt}");
        assert_eq!(h.queue.pending().await.unwrap()[0].retry_count, attempt);
    }

    let last = h.engine.perform_sync().await.unwrap();

    assert!(last.errors[0].permanent);
    assert_eq!(last.errors[0].entity_id, "bad");
    assert!(last.errors[0].message.contains("connection reset"));
    assert!(h.queue.is_empty().await.unwrap());

    let mut dropped = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::OperationDropped { entity_id, .. }) = event {
            assert_eq!(entity_id, "bad");
            dropped = true;
        }
    }
    assert!(dropped);
}

#[tokio::test]
async fn test_replayed_operation_leaves_same_remote_state() {
    let h = harness(true).await;
    let payload = json!({"favorite": true});

    enqueue_favorite(&h, "r-1", payload.clone()).await;
    h.engine.perform_sync().await.unwrap();
    let once = h.remote.record("recipe_favorites", "r-1");

    // Same mutation delivered again, as after a crash between apply and dequeue.
    enqueue_favorite(&h, "r-1", payload).await;
    h.engine.perform_sync().await.unwrap();

    assert_eq!(h.remote.record("recipe_favorites", "r-1"), once);
    assert_eq!(h.remote.records.lock().len(), 1);
}

#[tokio::test]
async fn test_delete_action() {
    let h = harness(true).await;
    enqueue_favorite(&h, "r-1", json!({"favorite": true})).await;
    h.engine
        .enqueue(
            SyncOperationType::RecipeFavorite,
            "r-1",
            SyncAction::Delete,
            Value::Null,
        )
        .await
        .unwrap();

    let result = h.engine.perform_sync().await.unwrap();

    assert_eq!(result.synced_operations, 2);
    assert_eq!(h.remote.record("recipe_favorites", "r-1"), None);
}

#[tokio::test]
async fn test_concurrent_drain_is_skipped() {
    let h = harness(true).await;
    enqueue_favorite(&h, "r-1", json!({})).await;
    h.remote.set_delay(Duration::from_millis(200));

    let running = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.perform_sync().await })
    };

    while !h.engine.is_syncing() {
        tokio::task::yield_now().await;
    }

    let second = h.engine.perform_sync().await.unwrap();
    assert_eq!(second.skipped, Some(SkipReason::AlreadySyncing));
    assert!(h.engine.get_status().await.unwrap().is_syncing);

    let first = running.await.unwrap().unwrap();
    assert_eq!(first.synced_operations, 1);
    assert!(!h.engine.is_syncing());
}

#[tokio::test]
async fn test_rejected_credentials_pause_sync() {
    let h = harness(true).await;
    for id in ["r-1", "r-2", "r-3"] {
        enqueue_favorite(&h, id, json!({})).await;
    }
    h.remote.unauthorized.store(true, Ordering::SeqCst);

    let result = h.engine.perform_sync().await.unwrap();

    assert_eq!(result.failed_operations, 1);
    assert_eq!(result.synced_operations, 0);
    let pending = h.queue.pending().await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|op| op.retry_count == 0));

    let status = h.engine.get_status().await.unwrap();
    assert_eq!(status.paused_until, Some(START + 30_000));

    let paused = h.engine.perform_sync().await.unwrap();
    assert_eq!(paused.skipped, Some(SkipReason::BackingOff));

    // Still rejected once the window passes: the window doubles.
    h.clock.advance(Duration::from_secs(31));
    h.engine.perform_sync().await.unwrap();
    let status = h.engine.get_status().await.unwrap();
    assert_eq!(status.paused_until, Some(START + 31_000 + 60_000));

    // Accepted again: the backlog drains and the backoff resets.
    h.remote.unauthorized.store(false, Ordering::SeqCst);
    h.clock.advance(Duration::from_secs(61));
    let recovered = h.engine.perform_sync().await.unwrap();

    assert!(recovered.success);
    assert_eq!(recovered.synced_operations, 3);
    assert_eq!(h.engine.get_status().await.unwrap().paused_until, None);
}

#[tokio::test]
async fn test_backoff_is_capped() {
    let config = SyncConfig::default()
        .with_backoff(Duration::from_secs(30), Duration::from_secs(90));
    let h = harness_with(config, true, None).await;
    enqueue_favorite(&h, "r-1", json!({})).await;
    h.remote.unauthorized.store(true, Ordering::SeqCst);

    let mut windows = Vec::new();
    for _ in 0..4 {
        h.engine.perform_sync().await.unwrap();
        let until = h.engine.get_status().await.unwrap().paused_until.unwrap();
        let now = h.clock.unix_timestamp_millis();
        windows.push(until - now);
        h.clock.set_millis(until + 1);
    }

    assert_eq!(windows, vec![30_000, 60_000, 90_000, 90_000]);
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let config = SyncConfig::default().with_operation_timeout(Duration::from_millis(50));
    let h = harness_with(config, true, None).await;
    enqueue_favorite(&h, "slow", json!({})).await;
    h.remote.set_delay(Duration::from_secs(2));

    let result = h.engine.perform_sync().await.unwrap();

    assert_eq!(result.failed_operations, 1);
    assert!(result.errors[0].message.contains("timed out"));
    let pending = h.queue.pending().await.unwrap();
    assert_eq!(pending[0].retry_count, 1);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let h = harness(false).await;
    enqueue_favorite(&h, "r-1", json!("first")).await;
    h.engine
        .enqueue(
            SyncOperationType::ChatMessage,
            "m-1",
            SyncAction::Upsert,
            json!({"text": "hi"}),
        )
        .await
        .unwrap();
    drop(h.engine);

    let reopened = open_queue(&h.pool, h.clock.clone()).await;
    let pending = reopened.pending().await.unwrap();

    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].entity_id, "r-1");
    assert_eq!(pending[0].payload, json!("first"));
    assert_eq!(pending[1].op_type, SyncOperationType::ChatMessage);
}

#[tokio::test]
async fn test_status_reports_queue_and_last_sync() {
    let h = harness(true).await;
    enqueue_favorite(&h, "r-1", json!({})).await;

    let before = h.engine.get_status().await.unwrap();
    assert!(before.is_online);
    assert_eq!(before.pending_operations, 1);
    assert_eq!(before.last_sync, None);

    h.clock.advance(Duration::from_secs(1));
    h.engine.perform_sync().await.unwrap();

    let after = h.engine.get_status().await.unwrap();
    assert_eq!(after.pending_operations, 0);
    assert_eq!(after.last_sync, Some(START + 1_000));
}

async fn wait_until_empty(queue: &SyncQueue) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue did not drain");
}

#[tokio::test]
async fn test_reconnect_triggers_background_drain() {
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let h = harness_with(SyncConfig::default(), false, Some(bus)).await;
    h.engine.start().await;

    enqueue_favorite(&h, "r-1", json!({})).await;
    enqueue_favorite(&h, "r-2", json!({})).await;
    assert_eq!(h.queue.len().await.unwrap(), 2);

    h.network.set_online(true);
    wait_until_empty(&h.queue).await;

    h.engine.cleanup().await;

    let mut saw_online = false;
    while let Ok(event) = events.try_recv() {
        if event == CoreEvent::Network(NetworkEvent::ConnectivityChanged { is_online: true }) {
            saw_online = true;
        }
    }
    assert!(saw_online);
}

#[tokio::test]
async fn test_enqueue_while_online_triggers_drain() {
    let h = harness(true).await;
    h.engine.start().await;

    enqueue_favorite(&h, "r-1", json!({"favorite": true})).await;
    wait_until_empty(&h.queue).await;

    assert_eq!(
        h.remote.record("recipe_favorites", "r-1"),
        Some(json!({"favorite": true}))
    );
    h.engine.cleanup().await;
}

#[tokio::test]
async fn test_cleanup_flushes_pending_operations() {
    let h = harness(true).await;
    h.engine.start().await;
    h.engine.cleanup().await;

    // Background tasks are gone; the final drain in cleanup still runs.
    h.queue
        .enqueue(
            SyncOperationType::ImageCache,
            "i-1",
            SyncAction::Upsert,
            json!({"url": "https://cdn.example.com/i-1.jpg"}),
        )
        .await
        .unwrap();
    h.engine.cleanup().await;

    assert!(h.queue.is_empty().await.unwrap());
}

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

#[tokio::test]
async fn test_rejection_halts_drain_after_first_attempt() {
    let pool = create_test_pool().await.unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let queue = open_queue(&pool, clock.clone()).await;

    let mut remote = MockRemote::new();
    remote
        .expect_upsert()
        .times(1)
        .returning(|_, _, _| Err(BridgeError::Unauthorized("revoked".to_string())));

    let engine = SyncEngine::new(
        SyncConfig::default(),
        queue.clone(),
        Arc::new(remote),
        Arc::new(ManualNetworkMonitor::new(true)),
        clock,
    )
    .unwrap();

    for id in ["a", "b", "c"] {
        engine
            .enqueue(SyncOperationType::RecipeAccess, id, SyncAction::Upsert, json!({}))
            .await
            .unwrap();
    }

    let result = engine.perform_sync().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(!result.errors[0].permanent);
    assert_eq!(queue.len().await.unwrap(), 3);
}
