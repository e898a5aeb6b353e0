//! # Sync Agent
//!
//! Wires the local store, the ledger and the scheduler together for one
//! device, and hands the till a [`SyncAgentHandle`] to ring up sales with.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • Builds the orchestrator from config                           │  │
//! │  │  • Spawns the scheduler (AUTO / MANUAL)                          │  │
//! │  │  • Turns connectivity-regained edges into immediate cycles       │  │
//! │  │  • Emits status events to the operator UI                        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  LocalStore    │  │SyncOrchestrator│  │   SyncScheduler        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ queue +        │  │ drain, refresh │  │ timer + triggers       │    │
//! │  │ catalog        │  │ purge          │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS:                                                        │
//! │  ──────────────                                                        │
//! │  status   - { online, queue: { pending, synced, error }, lastSync }    │
//! │  progress - { outstanding: 5, synced: 100 }                            │
//! │  error    - { message: "Ledger unavailable", retryable: true }         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stall_core::{CatalogSnapshot, CommitSaleRequest, OperatorContext, QueueCounts, QueueEntry};

use crate::config::{SyncConfig, SyncMode};
use crate::error::{SyncError, SyncResult};
use crate::ledger::RemoteLedger;
use crate::local::LocalStore;
use crate::orchestrator::{DrainReport, SaleReceipt, SyncOrchestrator};
use crate::scheduler::{SchedulerHandle, SyncScheduler, SyncTrigger};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub mode: SyncMode,

    /// Whether the ledger is believed reachable.
    pub online: bool,

    /// Whether the scheduler is running.
    pub running: bool,

    /// Queue entries per status.
    pub queue: QueueCounts,

    /// Last drain or cycle that finished without error.
    pub last_sync: Option<DateTime<Utc>>,

    pub last_drain: Option<DrainReport>,

    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events for the operator UI.
pub trait SyncEventEmitter: Send + Sync {
    fn emit_status(&self, status: &SyncStatus);

    fn emit_progress(&self, outstanding: i64, synced: i64);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// Discards every event.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _outstanding: i64, _synced: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

/// Logs every event through `tracing`.
pub struct TracingEmitter;

impl SyncEventEmitter for TracingEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        debug!(
            online = status.online,
            pending = status.queue.pending,
            stuck = status.queue.error,
            "Sync status"
        );
    }

    fn emit_progress(&self, outstanding: i64, synced: i64) {
        debug!(outstanding, synced, "Sync progress");
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        warn!(retryable, "Sync error: {}", message);
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

pub struct SyncAgent {
    config: Arc<SyncConfig>,
    orchestrator: Arc<SyncOrchestrator>,
    status: Arc<RwLock<SyncStatus>>,
    scheduler: Option<SchedulerHandle>,
    task: Option<JoinHandle<()>>,
}

impl SyncAgent {
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        ledger: Arc<dyn RemoteLedger>,
    ) -> Self {
        Self::with_emitter(config, local, ledger, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        ledger: Arc<dyn RemoteLedger>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let status = Arc::new(RwLock::new(SyncStatus {
            mode: config.sync.mode,
            ..Default::default()
        }));

        let orchestrator = SyncOrchestrator::new(local, ledger)
            .with_policy(config.sync.retry_policy())
            .with_batch_size(config.sync.batch_size)
            .with_retention(config.sync.retention())
            .with_emitter(emitter)
            .with_status(status.clone());

        SyncAgent {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            status,
            scheduler: None,
            task: None,
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        self.orchestrator.clone()
    }

    /// Starts the scheduler and returns a handle for the till.
    ///
    /// In OFFLINE mode no scheduler runs; the handle still queues sales.
    pub async fn start(&mut self) -> SyncResult<SyncAgentHandle> {
        self.config.validate()?;

        if self.scheduler.is_some() {
            return Err(SyncError::Internal("Sync agent already started".into()));
        }

        let ctx = self.config.operator_context();

        if !self.config.mode().is_sync_enabled() {
            info!("Sync is disabled (mode: offline), sales will only be queued");
            return Ok(SyncAgentHandle::new(
                ctx,
                self.config.mode(),
                self.orchestrator.clone(),
                self.status.clone(),
                None,
            ));
        }

        info!(
            device_id = %self.config.device_id(),
            tenant_id = %ctx.tenant_id,
            operator_id = %ctx.operator_id,
            mode = %self.config.mode(),
            "Starting sync agent"
        );

        let (scheduler, handle) = SyncScheduler::new(
            self.orchestrator.clone(),
            ctx.tenant_id.clone(),
            self.config.sync.interval(),
            self.config.mode().uses_timer(),
        );
        self.task = Some(tokio::spawn(scheduler.run()));
        self.scheduler = Some(handle.clone());

        self.status.write().await.running = true;

        info!("Sync agent started");
        Ok(SyncAgentHandle::new(
            ctx,
            self.config.mode(),
            self.orchestrator.clone(),
            self.status.clone(),
            Some(handle),
        ))
    }

    /// Stops the scheduler, letting an in-flight cycle finish first.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync agent");

        if let Some(handle) = self.scheduler.take() {
            let _ = handle.shutdown().await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(?e, "Scheduler task ended abnormally");
            }
        }

        self.status.write().await.running = false;

        info!("Sync agent stopped");
        Ok(())
    }
}

// =============================================================================
// Agent Handle
// =============================================================================

/// What the till holds on to: ring up sales, report connectivity, ask for
/// a sync.
#[derive(Clone)]
pub struct SyncAgentHandle {
    ctx: OperatorContext,
    mode: SyncMode,
    orchestrator: Arc<SyncOrchestrator>,
    status: Arc<RwLock<SyncStatus>>,
    scheduler: Option<SchedulerHandle>,
}

impl SyncAgentHandle {
    pub(crate) fn new(
        ctx: OperatorContext,
        mode: SyncMode,
        orchestrator: Arc<SyncOrchestrator>,
        status: Arc<RwLock<SyncStatus>>,
        scheduler: Option<SchedulerHandle>,
    ) -> Self {
        SyncAgentHandle {
            ctx,
            mode,
            orchestrator,
            status,
            scheduler,
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Rings up a sale for the configured operator.
    pub async fn record_sale(&self, request: CommitSaleRequest) -> SyncResult<SaleReceipt> {
        self.orchestrator.record_sale(&self.ctx, request).await
    }

    /// Reports connectivity. Regaining it starts an immediate cycle.
    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        if !self.mode.is_sync_enabled() {
            debug!(online, "Ignoring connectivity change in offline mode");
            return Ok(());
        }

        if self.orchestrator.set_online(online).await {
            if let Some(scheduler) = &self.scheduler {
                scheduler.trigger(SyncTrigger::ConnectivityRegained).await?;
            }
        }
        Ok(())
    }

    /// Asks for a cycle now.
    pub async fn sync_now(&self) -> SyncResult<()> {
        match &self.scheduler {
            Some(scheduler) => scheduler.trigger(SyncTrigger::Manual).await,
            None => Err(SyncError::Offline),
        }
    }

    pub async fn requeue(&self, entry_id: &str) -> SyncResult<QueueEntry> {
        self.orchestrator.requeue(entry_id).await
    }

    pub async fn catalog(&self) -> SyncResult<Option<CatalogSnapshot>> {
        self.orchestrator.catalog(&self.ctx.tenant_id).await
    }

    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            let _ = scheduler.shutdown().await;
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

pub struct SyncAgentBuilder {
    config: SyncConfig,
    local: Option<Arc<dyn LocalStore>>,
    ledger: Option<Arc<dyn RemoteLedger>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            local: None,
            ledger: None,
            emitter: None,
        }
    }

    pub fn with_local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn RemoteLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> SyncResult<SyncAgent> {
        let local = self
            .local
            .ok_or_else(|| SyncError::InvalidConfig("Local store required".into()))?;
        let ledger = self
            .ledger
            .ok_or_else(|| SyncError::InvalidConfig("Ledger required".into()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::with_emitter(self.config, local, ledger, emitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::testing::RecordingLedger;
    use stall_core::{Money, NewSaleItem, NewSalePayment, PaymentMethod, Quantity};
    use std::sync::Mutex;
    use std::time::Duration;

    fn config(mode: SyncMode) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.operator.tenant_id = "market-co".into();
        config.operator.operator_id = "maria".into();
        config.sync.mode = mode;
        config
    }

    fn sale(key: &str) -> CommitSaleRequest {
        CommitSaleRequest::new(
            vec![NewSaleItem::priced("apple", Quantity::from_units(3), Money::from_minor(250))],
            vec![NewSalePayment::new(PaymentMethod::Debit, Money::from_minor(750))],
        )
        .with_client_key(key)
    }

    fn agent(mode: SyncMode, ledger: Arc<RecordingLedger>) -> SyncAgent {
        SyncAgentBuilder::new(config(mode))
            .with_local_store(Arc::new(MemoryLocalStore::new()))
            .with_ledger(ledger)
            .build()
            .unwrap()
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[derive(Default)]
    struct CollectingEmitter {
        errors: Mutex<Vec<String>>,
        progress: Mutex<Vec<(i64, i64)>>,
    }

    impl SyncEventEmitter for CollectingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {}

        fn emit_progress(&self, outstanding: i64, synced: i64) {
            self.progress.lock().unwrap().push((outstanding, synced));
        }

        fn emit_error(&self, message: &str, _retryable: bool) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_builder_requires_store_and_ledger() {
        let result = SyncAgentBuilder::new(config(SyncMode::Auto))
            .with_ledger(Arc::new(RecordingLedger::new()))
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_unconfigured_operator() {
        let mut agent = SyncAgentBuilder::new(SyncConfig::default())
            .with_local_store(Arc::new(MemoryLocalStore::new()))
            .with_ledger(Arc::new(RecordingLedger::new()))
            .build()
            .unwrap();
        assert!(matches!(agent.start().await, Err(SyncError::MissingOperator)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_regained_drains_queue() {
        let ledger = Arc::new(RecordingLedger::new());
        let mut agent = agent(SyncMode::Manual, ledger.clone());
        let handle = agent.start().await.unwrap();

        let receipt = handle.record_sale(sale("K-1")).await.unwrap();
        assert!(!receipt.is_synced());
        let receipt = handle.record_sale(sale("K-2")).await.unwrap();
        assert!(!receipt.is_synced());

        handle.set_online(true).await.unwrap();
        wait_for(|| ledger.committed_keys().len() == 2).await;
        assert_eq!(ledger.committed_keys(), vec!["K-1", "K-2"]);

        wait_for(|| ledger.catalog_fetches() == 1).await;
        let status = handle.status().await;
        assert!(status.online);
        assert!(status.running);
        assert_eq!(status.queue.synced, 2);
        assert!(handle.catalog().await.unwrap().is_some());

        // Online sales go straight through
        let receipt = handle.record_sale(sale("K-3")).await.unwrap();
        assert!(receipt.is_synced());

        agent.shutdown().await.unwrap();
        assert!(!agent.status().await.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_mode_never_contacts_ledger() {
        let ledger = Arc::new(RecordingLedger::new());
        let mut agent = agent(SyncMode::Offline, ledger.clone());
        let handle = agent.start().await.unwrap();

        handle.set_online(true).await.unwrap();
        let receipt = handle.record_sale(sale("K-1")).await.unwrap();
        assert!(matches!(receipt, SaleReceipt::Queued(_)));
        assert!(matches!(handle.sync_now().await, Err(SyncError::Offline)));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(ledger.committed_keys().is_empty());
        assert_eq!(ledger.catalog_fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_is_reported() {
        let ledger = Arc::new(RecordingLedger::new());
        let emitter = Arc::new(CollectingEmitter::default());
        let mut agent = SyncAgentBuilder::new(config(SyncMode::Manual))
            .with_local_store(Arc::new(MemoryLocalStore::new()))
            .with_ledger(ledger.clone())
            .with_emitter(emitter.clone())
            .build()
            .unwrap();
        let handle = agent.start().await.unwrap();

        handle.record_sale(sale("K-1")).await.unwrap();
        ledger.set_down(true);
        handle.set_online(true).await.unwrap();

        wait_for(|| !emitter.errors.lock().unwrap().is_empty()).await;
        let status = handle.status().await;
        assert_eq!(status.queue.pending, 1);
        assert!(status.last_error.is_some());
        assert_eq!(
            status.last_drain.as_ref().map(|d| d.failed),
            Some(1)
        );

        // Manual retry once the ledger is back
        ledger.set_down(false);
        handle.sync_now().await.unwrap();
        wait_for(|| ledger.committed_keys().len() == 1).await;
        wait_for(|| emitter.progress.lock().unwrap().last() == Some(&(0, 1))).await;
        assert_eq!(emitter.progress.lock().unwrap().last(), Some(&(0, 1)));

        handle.shutdown().await;
    }
}
