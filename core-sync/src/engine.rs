//! # Sync Engine
//!
//! Drains the [`SyncQueue`] against the remote store whenever the device is
//! online.
//!
//! ## Workflow
//!
//! 1. Skip if a drain is already running, a backoff window is open, or the
//!    device is offline
//! 2. Snapshot the queue and apply it batch by batch from the head
//! 3. Remove operations the remote accepted
//! 4. Requeue failed operations at the tail with their entity's later
//!    operations, or drop them once `max_retries` is reached
//! 5. Stop the drain and open a backoff window if the remote rejects the
//!    credentials
//!
//! ## Scheduling
//!
//! [`SyncEngine::start`] spawns a scheduler that drains on a fixed interval
//! and whenever it is triggered (enqueue while online, offline to online
//! transition), plus a watcher on the network change stream. Both stop on
//! [`SyncEngine::cleanup`].

use crate::error::{Result, SyncError};
use crate::operation::{SyncAction, SyncOperation, SyncOperationId, SyncOperationType};
use crate::queue::{FailureOutcome, SyncQueue};
use bridge_traits::error::BridgeError;
use bridge_traits::network::{NetworkChangeStream, NetworkMonitor};
use bridge_traits::remote::RemoteClient;
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent, SyncEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Operations read from the head of the queue at a time (default: 10)
    pub batch_size: usize,

    /// Failed attempts before an operation is dropped (default: 3)
    pub max_retries: u32,

    /// Interval of the periodic drain (default: 5 minutes)
    pub sync_interval: Duration,

    /// Timeout for a single remote apply (default: 5 seconds)
    pub operation_timeout: Duration,

    /// First backoff window after an authentication rejection (default: 30 seconds)
    pub initial_backoff: Duration,

    /// Upper bound of the doubling backoff window (default: 15 minutes)
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            sync_interval: Duration::from_secs(5 * 60),
            operation_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(15 * 60),
        }
    }
}

impl SyncConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }

        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }

        if self.sync_interval.is_zero() || self.operation_timeout.is_zero() {
            return Err("sync_interval and operation_timeout must be greater than zero".to_string());
        }

        if self.initial_backoff.is_zero() || self.initial_backoff > self.max_backoff {
            return Err("initial_backoff must be in (0, max_backoff]".to_string());
        }

        Ok(())
    }
}

/// Why a drain did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadySyncing,
    BackingOff,
    Offline,
}

/// An operation that failed during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub operation_id: SyncOperationId,
    pub op_type: SyncOperationType,
    pub entity_id: String,
    pub message: String,
    /// True if the operation was dropped and will not be retried
    pub permanent: bool,
}

/// Outcome of a drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub synced_operations: usize,
    pub failed_operations: usize,
    pub errors: Vec<SyncFailure>,
    pub skipped: Option<SkipReason>,
}

impl SyncResult {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Snapshot returned by [`SyncEngine::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    /// Unix milliseconds of the last completed drain
    pub last_sync: Option<i64>,
    pub pending_operations: usize,
    pub is_syncing: bool,
    /// Unix milliseconds until which drains are paused by backoff
    pub paused_until: Option<i64>,
}

#[derive(Debug, Default)]
struct EngineState {
    last_sync: Option<i64>,
    paused_until: Option<i64>,
    backoff: Option<Duration>,
}

struct Background {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Resets the single-flight flag when a drain ends, even by cancellation.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Flow {
    Continue,
    Halt,
}

/// Per-drain bookkeeping.
#[derive(Default)]
struct Drain {
    result: SyncResult,
    blocked: HashSet<(SyncOperationType, String)>,
}

/// Reconciles queued operations with the remote store
pub struct SyncEngine {
    config: SyncConfig,
    queue: Arc<SyncQueue>,
    remote: Arc<dyn RemoteClient>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    event_bus: Option<Arc<EventBus>>,
    is_syncing: AtomicBool,
    state: Mutex<EngineState>,
    trigger: Notify,
    background: Mutex<Option<Background>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        queue: Arc<SyncQueue>,
        remote: Arc<dyn RemoteClient>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(SyncError::InvalidConfig)?;

        Ok(Self {
            config,
            queue,
            remote,
            network,
            clock,
            event_bus: None,
            is_syncing: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
            trigger: Notify::new(),
            background: Mutex::new(None),
        })
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Queue a mutation for the remote store.
    ///
    /// The operation is durable when this returns. If the device is online
    /// the scheduler is woken to drain it.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        op_type: SyncOperationType,
        entity_id: &str,
        action: SyncAction,
        payload: serde_json::Value,
    ) -> Result<SyncOperation> {
        let op = self.queue.enqueue(op_type, entity_id, action, payload).await?;

        if self.network.is_connected().await {
            self.trigger.notify_one();
        }

        Ok(op)
    }

    /// Wake the scheduler for an immediate drain.
    pub fn request_sync(&self) {
        self.trigger.notify_one();
    }

    /// Close the backoff window, e.g. after the host refreshed credentials.
    pub fn reset_backoff(&self) {
        let mut state = self.state.lock();
        state.paused_until = None;
        state.backoff = None;
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    pub async fn get_status(&self) -> Result<SyncStatus> {
        let is_online = self.network.is_connected().await;
        let pending_operations = self.queue.len().await?;
        let state = self.state.lock();

        Ok(SyncStatus {
            is_online,
            last_sync: state.last_sync,
            pending_operations,
            is_syncing: self.is_syncing(),
            paused_until: state.paused_until,
        })
    }

    /// Drain one batch from the head of the queue.
    pub async fn drain(&self) -> Result<SyncResult> {
        self.run(Some(self.config.batch_size)).await
    }

    /// Attempt every operation queued when the drain starts, at most once.
    ///
    /// Remote failures are reported in the result. Only local storage
    /// failures are returned as errors.
    pub async fn perform_sync(&self) -> Result<SyncResult> {
        self.run(None).await
    }

    #[instrument(skip(self))]
    async fn run(&self, limit: Option<usize>) -> Result<SyncResult> {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress");
            return Ok(SyncResult::skipped(SkipReason::AlreadySyncing));
        }
        let _guard = SyncingGuard(&self.is_syncing);

        let now = self.clock.unix_timestamp_millis();
        if let Some(until) = self.state.lock().paused_until {
            if now < until {
                debug!(paused_until = until, "Sync paused by backoff");
                return Ok(SyncResult::skipped(SkipReason::BackingOff));
            }
        }

        if !self.network.is_connected().await {
            debug!("Offline, skipping sync");
            return Ok(SyncResult::skipped(SkipReason::Offline));
        }

        let snapshot = match limit {
            Some(limit) => self.queue.peek_batch(limit).await?,
            None => self.queue.pending().await?,
        };

        let started = Instant::now();
        info!(pending = snapshot.len(), "Starting sync");
        self.emit(SyncEvent::Started {
            pending: snapshot.len(),
        });

        let mut drain = Drain::default();
        for batch in snapshot.chunks(self.config.batch_size) {
            if let Flow::Halt = self.process_batch(batch, &mut drain).await? {
                break;
            }
        }

        let mut result = drain.result;
        result.success = result.errors.is_empty();
        self.state.lock().last_sync = Some(self.clock.unix_timestamp_millis());

        let remaining = self.queue.len().await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            synced = result.synced_operations,
            failed = result.failed_operations,
            remaining,
            duration_ms,
            "Sync completed"
        );
        self.emit(SyncEvent::Completed {
            synced: result.synced_operations,
            failed: result.failed_operations,
            remaining,
            duration_ms,
        });

        Ok(result)
    }

    async fn process_batch(&self, batch: &[SyncOperation], drain: &mut Drain) -> Result<Flow> {
        for op in batch {
            let entity = (op.op_type, op.entity_id.clone());
            if drain.blocked.contains(&entity) {
                debug!(operation_id = %op.id, "Skipping operation behind a failed one");
                continue;
            }

            let error = match self.apply(op).await {
                Ok(()) => {
                    self.queue.complete(op.id).await?;
                    drain.result.synced_operations += 1;
                    self.on_success();
                    continue;
                }
                Err(e) => e,
            };

            drain.result.failed_operations += 1;
            let message = error.to_string();

            if error.is_systemic() {
                self.enter_backoff(&message);
                drain.result.errors.push(SyncFailure {
                    operation_id: op.id,
                    op_type: op.op_type,
                    entity_id: op.entity_id.clone(),
                    message,
                    permanent: false,
                });
                return Ok(Flow::Halt);
            }

            drain.blocked.insert(entity);

            let mut failed = op.clone();
            let outcome = self
                .queue
                .record_failure(&mut failed, &message, self.config.max_retries)
                .await?;

            let permanent = outcome == FailureOutcome::Dropped;
            if permanent {
                warn!(
                    operation_id = %op.id,
                    op_type = %op.op_type,
                    entity_id = %op.entity_id,
                    error = %message,
                    "Sync operation failed permanently"
                );
                self.emit(SyncEvent::OperationDropped {
                    operation_id: op.id.to_string(),
                    op_type: op.op_type.to_string(),
                    entity_id: op.entity_id.clone(),
                    message: message.clone(),
                });
            } else {
                debug!(
                    operation_id = %op.id,
                    retry_count = failed.retry_count,
                    error = %message,
                    "Sync operation failed, will retry"
                );
            }

            drain.result.errors.push(SyncFailure {
                operation_id: op.id,
                op_type: op.op_type,
                entity_id: op.entity_id.clone(),
                message,
                permanent,
            });
        }

        Ok(Flow::Continue)
    }

    async fn apply(&self, op: &SyncOperation) -> std::result::Result<(), BridgeError> {
        let collection = op.op_type.collection();
        let call = async {
            match op.action {
                SyncAction::Upsert => {
                    self.remote
                        .upsert(collection, &op.entity_id, &op.payload)
                        .await
                }
                SyncAction::Delete => self.remote.delete(collection, &op.entity_id).await,
            }
        };

        match tokio::time::timeout(self.config.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(
                self.config.operation_timeout.as_millis() as u64,
            )),
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock();
        state.paused_until = None;
        state.backoff = None;
    }

    fn enter_backoff(&self, message: &str) {
        let now = self.clock.unix_timestamp_millis();
        let paused_until = {
            let mut state = self.state.lock();
            let delay = match state.backoff {
                Some(previous) => (previous * 2).min(self.config.max_backoff),
                None => self.config.initial_backoff,
            };
            let paused_until = now + delay.as_millis() as i64;
            state.backoff = Some(delay);
            state.paused_until = Some(paused_until);
            paused_until
        };

        warn!(paused_until, error = %message, "Remote rejected credentials, pausing sync");
        self.emit(SyncEvent::BackoffStarted {
            paused_until,
            message: message.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Sync(event));
        }
    }

    /// Spawn the scheduler and the connectivity watcher.
    ///
    /// Calling `start` on a running engine does nothing.
    pub async fn start(self: &Arc<Self>) {
        if self.background.lock().is_some() {
            warn!("Sync engine already started");
            return;
        }

        let cancel = CancellationToken::new();
        let mut handles = vec![self.spawn_scheduler(cancel.clone())];

        match self.network.subscribe_changes().await {
            Ok(changes) => {
                let was_online = self.network.is_connected().await;
                handles.push(self.spawn_network_watcher(changes, was_online, cancel.clone()));
            }
            Err(e) => warn!(error = %e, "Network change stream unavailable, relying on timer"),
        }

        let mut background = self.background.lock();
        if background.is_some() {
            cancel.cancel();
            return;
        }
        *background = Some(Background { cancel, handles });

        info!(interval_secs = self.config.sync_interval.as_secs(), "Sync engine started");
    }

    fn spawn_scheduler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = engine.trigger.notified() => {}
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = engine.perform_sync() => match result {
                        Ok(result) => {
                            if let Some(reason) = result.skipped {
                                debug!(?reason, "Scheduled sync skipped");
                            }
                        }
                        Err(e) => error!(error = %e, "Scheduled sync failed"),
                    }
                }
            }

            debug!("Sync scheduler stopped");
        })
    }

    fn spawn_network_watcher(
        self: &Arc<Self>,
        mut changes: Box<dyn NetworkChangeStream>,
        mut was_online: bool,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let info = tokio::select! {
                    _ = cancel.cancelled() => break,
                    info = changes.next() => info,
                };

                let Some(info) = info else {
                    debug!("Network change stream closed");
                    break;
                };

                let is_online = info.is_connected();
                if is_online == was_online {
                    continue;
                }
                was_online = is_online;

                if let Some(bus) = &engine.event_bus {
                    let _ = bus.emit(CoreEvent::Network(NetworkEvent::ConnectivityChanged {
                        is_online,
                    }));
                }

                if is_online {
                    info!("Connectivity restored, triggering sync");
                    engine.trigger.notify_one();
                } else {
                    info!("Connectivity lost");
                }
            }
        })
    }

    /// Stop background tasks, then make one best-effort drain.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) {
        let background = self.background.lock().take();

        if let Some(background) = background {
            background.cancel.cancel();
            for handle in background.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Sync background task ended abnormally");
                }
            }
        }

        match self.perform_sync().await {
            Ok(result) if result.skipped.is_none() => {
                info!(synced = result.synced_operations, "Final sync completed")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Final sync failed"),
        }
    }
}
