//! # Sync Orchestrator
//!
//! Moves queued sales to the ledger and fresh catalog data back to the till.
//!
//! ## Sync Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One Sync Cycle                                  │
//! │                                                                         │
//! │  offline? ──yes──► skip, nothing attempted                             │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │  1. DRAIN PENDING                                                      │
//! │     page through PENDING, then ERROR entries (oldest first):          │
//! │        ledger.commit_sale(entry)                                       │
//! │          ├── Created / AlreadyCommitted ──► mark_synced                │
//! │          └── error ──► mark_failed (attempts + 1)                      │
//! │                          └── attempts ≥ max or permanent ──► ERROR     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  2. REFRESH CATALOG                                                    │
//! │     ledger.fetch_catalog ──► local.replace_catalog                     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  3. PURGE synced entries past retention                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Drain always runs before refresh, so a refreshed snapshot already
//! reflects the stock this device just sold.
//!
//! ## Retry Backoff
//! Scheduled drains skip entries still inside their backoff window.
//! Connectivity-regained and manual drains attempt every outstanding entry.
//!
//! ```text
//! attempts:   1    2    3    4    5    6    7    8    9 ...
//! delay (s):  2    4    8   16   32   64  128  256  300 (capped)
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use stall_core::validation::validate_sale_request;
use stall_core::{
    CatalogSnapshot, CommitSaleRequest, OperatorContext, PendingSale, QueueCounts, QueueEntry,
    QueueStatus, Sale,
};

use crate::agent::{NoOpEmitter, SyncEventEmitter, SyncStatus};
use crate::error::{SyncError, SyncResult};
use crate::ledger::RemoteLedger;
use crate::local::{LocalStore, QueuePosition};

// =============================================================================
// Retry Policy
// =============================================================================

/// Exponential retry schedule for failed queue entries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    pub multiplier: f64,
    /// Cap on the delay.
    pub max: Duration,
    /// Failed attempts after which an entry is flagged as stuck.
    pub max_attempts: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial: Duration::from_secs(2),
            multiplier: 2.0,
            max: Duration::from_secs(300),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Wait imposed after `attempts` failures.
    pub fn delay_for(&self, attempts: i64) -> Duration {
        if attempts <= 0 {
            return Duration::ZERO;
        }

        let mut backoff = ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        let mut delay = self.initial;
        for _ in 0..attempts {
            match backoff.next_backoff() {
                Some(next) => delay = next,
                None => break,
            }
            if delay >= self.max {
                return self.max;
            }
        }
        delay
    }

    /// Returns true once `attempts` failures should flag the entry as stuck.
    pub fn is_exhausted(&self, attempts: i64) -> bool {
        attempts >= self.max_attempts
    }

    /// Returns true if `entry` is outside its backoff window at `now`.
    pub fn is_due(&self, entry: &QueueEntry, now: DateTime<Utc>) -> bool {
        let Some(last) = entry.last_attempt_at else {
            return true;
        };
        match chrono::Duration::from_std(self.delay_for(entry.attempts)) {
            Ok(delay) => now >= last + delay,
            Err(_) => true,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Which drain is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// Timer-driven: honours each entry's backoff window.
    Scheduled,
    /// Connectivity regained or operator asked: tries everything now.
    Immediate,
}

/// One entry that did not make it to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainFailure {
    pub entry_id: String,
    pub client_key: String,
    pub message: String,
    /// Entry is now in `error`.
    pub stuck: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    /// Skipped because still inside the backoff window.
    pub deferred: usize,
    pub errors: Vec<DrainFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub varieties: usize,
    pub suppliers: usize,
    pub locations: usize,
}

impl From<&CatalogSnapshot> for RefreshReport {
    fn from(snapshot: &CatalogSnapshot) -> Self {
        RefreshReport {
            varieties: snapshot.varieties.len(),
            suppliers: snapshot.suppliers.len(),
            locations: snapshot.locations.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// False when the cycle was skipped because the device is offline.
    pub attempted: bool,
    pub drain: DrainReport,
    /// None when the refresh failed; the previous snapshot stays in place.
    pub refresh: Option<RefreshReport>,
    pub purged: u64,
}

/// What happened to a sale rung up on the till.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleReceipt {
    /// The ledger has it.
    Committed(Sale),
    /// Durably queued, awaiting a drain.
    Queued(QueueEntry),
}

impl SaleReceipt {
    pub fn is_synced(&self) -> bool {
        matches!(self, SaleReceipt::Committed(_))
    }

    pub fn client_key(&self) -> Option<&str> {
        match self {
            SaleReceipt::Committed(sale) => sale.client_key.as_deref(),
            SaleReceipt::Queued(entry) => Some(&entry.client_key),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct SyncOrchestrator {
    local: Arc<dyn LocalStore>,
    ledger: Arc<dyn RemoteLedger>,
    policy: RetryPolicy,
    /// Queue entries read per page while draining.
    batch_size: usize,
    retention: chrono::Duration,
    online: AtomicBool,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    /// Held for the whole of a drain or cycle; the device is the single
    /// writer of its queue.
    cycle_lock: Mutex<()>,
}

impl SyncOrchestrator {
    /// Starts offline; call [`set_online`](Self::set_online) once
    /// connectivity is known.
    pub fn new(local: Arc<dyn LocalStore>, ledger: Arc<dyn RemoteLedger>) -> Self {
        SyncOrchestrator {
            local,
            ledger,
            policy: RetryPolicy::default(),
            batch_size: 100,
            retention: chrono::Duration::days(30),
            online: AtomicBool::new(false),
            status: Arc::new(RwLock::new(SyncStatus::default())),
            emitter: Arc::new(NoOpEmitter),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_status(mut self, status: Arc<RwLock<SyncStatus>>) -> Self {
        self.status = status;
        self
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records connectivity. Returns true only on an offline → online edge.
    pub async fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return false;
        }

        info!(online, "Connectivity changed");
        let snapshot = {
            let mut status = self.status.write().await;
            status.online = online;
            status.clone()
        };
        self.emitter.emit_status(&snapshot);

        online
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Rings up a sale: straight to the ledger when reachable, otherwise
    /// into the durable queue.
    ///
    /// Business rejections from the ledger (no open register, mismatched
    /// totals) go back to the caller and nothing is queued.
    pub async fn record_sale(
        &self,
        ctx: &OperatorContext,
        request: CommitSaleRequest,
    ) -> SyncResult<SaleReceipt> {
        validate_sale_request(&request)?;
        let pending = PendingSale::new(ctx, request);

        if self.is_online() {
            match self.ledger.commit_sale(ctx, pending.request.clone()).await {
                Ok(outcome) => {
                    debug!(client_key = %pending.client_key, "Sale committed online");
                    return Ok(SaleReceipt::Committed(outcome.into_sale()));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        client_key = %pending.client_key,
                        error = %e,
                        "Ledger unavailable, queueing sale"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let entry = self.local.enqueue(pending).await?;
        self.refresh_counts(&ctx.tenant_id).await;
        Ok(SaleReceipt::Queued(entry))
    }

    /// Operator action on a stuck entry.
    pub async fn requeue(&self, entry_id: &str) -> SyncResult<QueueEntry> {
        let entry = self.local.requeue(entry_id).await?;
        self.refresh_counts(&entry.tenant_id).await;
        Ok(entry)
    }

    pub async fn counts(&self, tenant_id: &str) -> SyncResult<QueueCounts> {
        self.local.counts(tenant_id).await
    }

    /// The catalog the till sells from while offline.
    pub async fn catalog(&self, tenant_id: &str) -> SyncResult<Option<CatalogSnapshot>> {
        self.local.catalog(tenant_id).await
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Replays every outstanding entry now, ignoring backoff windows.
    pub async fn drain_pending(&self, tenant_id: &str) -> SyncResult<DrainReport> {
        self.drain(tenant_id, DrainMode::Immediate).await
    }

    pub async fn drain(&self, tenant_id: &str, mode: DrainMode) -> SyncResult<DrainReport> {
        let _guard = self.cycle_lock.lock().await;
        self.ensure_online()?;
        let report = self.drain_locked(tenant_id, mode).await?;
        self.finish(tenant_id, Some(&report), None).await;
        Ok(report)
    }

    /// Replaces the local snapshot with the ledger's current catalog.
    pub async fn refresh_catalog(&self, tenant_id: &str) -> SyncResult<RefreshReport> {
        let _guard = self.cycle_lock.lock().await;
        self.ensure_online()?;
        self.refresh_locked(tenant_id).await
    }

    /// Deletes synced entries older than the retention window.
    pub async fn purge_synced(&self) -> SyncResult<u64> {
        self.local.purge_synced(Utc::now() - self.retention).await
    }

    /// Drain, then refresh, then purge. A no-op while offline.
    pub async fn run_cycle(&self, tenant_id: &str, mode: DrainMode) -> SyncResult<CycleReport> {
        let _guard = self.cycle_lock.lock().await;

        if !self.is_online() {
            debug!(tenant_id = %tenant_id, "Offline, skipping sync cycle");
            return Ok(CycleReport::default());
        }

        let drain = match self.drain_locked(tenant_id, mode).await {
            Ok(report) => report,
            Err(e) => {
                self.finish(tenant_id, None, Some(e.to_string())).await;
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
                return Err(e);
            }
        };

        let (refresh, refresh_error) = match self.refresh_locked(tenant_id).await {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Catalog refresh failed");
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
                (None, Some(e.to_string()))
            }
        };

        let purged = self.purge_synced().await?;

        self.finish(tenant_id, Some(&drain), refresh_error).await;

        Ok(CycleReport {
            attempted: true,
            drain,
            refresh,
            purged,
        })
    }

    // =========================================================================
    // Internals (caller holds cycle_lock)
    // =========================================================================

    fn ensure_online(&self) -> SyncResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(SyncError::Offline)
        }
    }

    /// Walks the whole outstanding queue page by page: every pending entry
    /// oldest first, then every stuck entry. Entries that keep failing can
    /// delay newer ones by one attempt each, never hide them.
    async fn drain_locked(&self, tenant_id: &str, mode: DrainMode) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut attempted = HashSet::new();
        let page_size = self.batch_size;
        let now = Utc::now();

        for status in [QueueStatus::Pending, QueueStatus::Error] {
            let mut after: Option<QueuePosition> = None;
            loop {
                let page = self
                    .local
                    .page(tenant_id, status, after.as_ref(), page_size)
                    .await?;

                for entry in page.entries {
                    // An entry flagged stuck earlier in this drain shows up
                    // again under Error
                    if !attempted.insert(entry.id.clone()) {
                        continue;
                    }
                    if mode == DrainMode::Scheduled && !self.policy.is_due(&entry, now) {
                        report.deferred += 1;
                        continue;
                    }
                    self.replay_entry(entry, &mut report).await?;
                }

                match page.next {
                    Some(next) => after = Some(next),
                    None => break,
                }
            }
        }

        if report.synced > 0 || report.failed > 0 {
            info!(
                tenant_id = %tenant_id,
                synced = report.synced,
                failed = report.failed,
                deferred = report.deferred,
                ?mode,
                "Drain finished"
            );
        } else {
            debug!(tenant_id = %tenant_id, deferred = report.deferred, "Nothing to drain");
        }

        Ok(report)
    }

    /// Sends one queued sale to the ledger and records the outcome.
    async fn replay_entry(&self, entry: QueueEntry, report: &mut DrainReport) -> SyncResult<()> {
        let ctx = entry.payload.operator();
        match self
            .ledger
            .commit_sale(&ctx, entry.payload.request.clone())
            .await
        {
            Ok(outcome) => {
                self.local.mark_synced(&entry.id, &outcome.sale().id).await?;
                debug!(
                    entry_id = %entry.id,
                    sale_id = %outcome.sale().id,
                    replay = outcome.is_replay(),
                    "Queue entry synced"
                );
                report.synced += 1;
            }
            Err(e) => {
                let stuck = e.is_permanent() || self.policy.is_exhausted(entry.attempts + 1);
                let updated = self
                    .local
                    .mark_failed(&entry.id, &e.to_string(), stuck)
                    .await?;

                if stuck && entry.status != QueueStatus::Error {
                    warn!(
                        entry_id = %entry.id,
                        client_key = %entry.client_key,
                        attempts = updated.attempts,
                        error = %e,
                        "Queue entry stuck, operator attention needed"
                    );
                } else {
                    debug!(
                        entry_id = %entry.id,
                        attempts = updated.attempts,
                        error = %e,
                        "Queue entry failed, will retry"
                    );
                }

                report.failed += 1;
                report.errors.push(DrainFailure {
                    entry_id: entry.id,
                    client_key: entry.client_key,
                    message: e.to_string(),
                    stuck,
                });
            }
        }
        Ok(())
    }

    async fn refresh_locked(&self, tenant_id: &str) -> SyncResult<RefreshReport> {
        let snapshot = self.ledger.fetch_catalog(tenant_id).await?;
        self.local.replace_catalog(&snapshot).await?;

        let report = RefreshReport::from(&snapshot);
        debug!(
            tenant_id = %tenant_id,
            varieties = report.varieties,
            "Catalog refreshed"
        );
        Ok(report)
    }

    /// Publishes queue counts and the outcome of a drain or cycle.
    async fn finish(&self, tenant_id: &str, drain: Option<&DrainReport>, error: Option<String>) {
        let counts = self.local.counts(tenant_id).await.ok();

        let snapshot = {
            let mut status = self.status.write().await;
            if let Some(counts) = counts {
                status.queue = counts;
            }
            if let Some(report) = drain {
                status.last_drain = Some(report.clone());
            }
            if error.is_none() {
                status.last_sync = Some(Utc::now());
            }
            status.last_error =
                error.or_else(|| drain.and_then(|r| r.errors.last().map(|f| f.message.clone())));
            status.clone()
        };

        self.emitter
            .emit_progress(snapshot.queue.outstanding(), snapshot.queue.synced);
        self.emitter.emit_status(&snapshot);
    }

    async fn refresh_counts(&self, tenant_id: &str) {
        if let Ok(counts) = self.local.counts(tenant_id).await {
            let mut status = self.status.write().await;
            status.queue = counts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DatabaseLedger;
    use crate::local::{MemoryLocalStore, SqliteLocalStore};
    use async_trait::async_trait;
    use stall_core::{
        CommitOutcome, Money, NewSaleItem, NewSalePayment, OpenRegisterRequest, PaymentMethod,
        Quantity, Variety,
    };
    use stall_db::{Database, DbConfig};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    const TENANT: &str = "market-co";

    fn ctx() -> OperatorContext {
        OperatorContext::new(TENANT, "maria")
    }

    fn m(minor: i64) -> Money {
        Money::from_minor(minor)
    }

    fn sale(key: &str) -> CommitSaleRequest {
        CommitSaleRequest::new(
            vec![NewSaleItem::priced("tomato", Quantity::from_milli(2_000), m(180))],
            vec![NewSalePayment::new(PaymentMethod::Cash, m(360))],
        )
        .with_client_key(key)
    }

    /// Ledger over a real store that can be told to fail.
    struct FlakyLedger {
        inner: DatabaseLedger,
        down: AtomicBool,
        unavailable_keys: StdMutex<HashSet<String>>,
        commits: AtomicUsize,
    }

    impl FlakyLedger {
        fn new(db: Database) -> Self {
            FlakyLedger {
                inner: DatabaseLedger::new(db),
                down: AtomicBool::new(false),
                unavailable_keys: StdMutex::new(HashSet::new()),
                commits: AtomicUsize::new(0),
            }
        }

        fn fail_key(&self, key: &str) {
            self.unavailable_keys.lock().unwrap().insert(key.to_string());
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn commits(&self) -> usize {
            self.commits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteLedger for FlakyLedger {
        async fn commit_sale(
            &self,
            ctx: &OperatorContext,
            request: CommitSaleRequest,
        ) -> SyncResult<CommitOutcome> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(SyncError::Unavailable("connection refused".into()));
            }
            let key = request.client_key.clone().unwrap_or_default();
            if self.unavailable_keys.lock().unwrap().contains(&key) {
                return Err(SyncError::Unavailable("timeout".into()));
            }
            self.inner.commit_sale(ctx, request).await
        }

        async fn fetch_catalog(&self, tenant_id: &str) -> SyncResult<CatalogSnapshot> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SyncError::Unavailable("connection refused".into()));
            }
            self.inner.fetch_catalog(tenant_id).await
        }
    }

    async fn ledger_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog()
            .upsert_variety(&Variety {
                id: "tomato".into(),
                tenant_id: TENANT.into(),
                name: "Tomato".into(),
                sku: None,
                price: m(180),
                stock: Some(Quantity::from_units(50)),
                supplier_id: None,
                location_id: None,
                is_active: true,
            })
            .await
            .unwrap();
        db.registers()
            .open(
                &ctx(),
                OpenRegisterRequest {
                    opening_amount: m(10_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        db
    }

    async fn setup() -> (Database, Arc<FlakyLedger>, SyncOrchestrator) {
        let db = ledger_db().await;
        let ledger = Arc::new(FlakyLedger::new(db.clone()));
        let orchestrator =
            SyncOrchestrator::new(Arc::new(MemoryLocalStore::new()), ledger.clone());
        (db, ledger, orchestrator)
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(9), Duration::from_secs(300));
        assert_eq!(policy.delay_for(50), Duration::from_secs(300));
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
    }

    #[tokio::test]
    async fn test_offline_sale_replays_exactly_once() {
        let db = ledger_db().await;
        let local = Arc::new(SqliteLocalStore::in_memory().await.unwrap());
        let orchestrator =
            SyncOrchestrator::new(local.clone(), Arc::new(DatabaseLedger::new(db.clone())));

        // Rung up offline
        let receipt = orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();
        assert!(!receipt.is_synced());
        assert_eq!(receipt.client_key(), Some("K-1"));
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 0);

        // Back online
        assert!(orchestrator.set_online(true).await);
        let report = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 1);

        let entry = local.find_by_client_key(TENANT, "K-1").await.unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Synced);
        let committed = db.sales().get_by_client_key(TENANT, "K-1").await.unwrap().unwrap();
        assert_eq!(entry.server_sale_id.as_deref(), Some(committed.id.as_str()));

        // Synced is terminal: not requeueable, not drained again
        local.requeue(&entry.id).await.unwrap_err();
        let again = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(again, DrainReport::default());

        // Same key through the online path: the ledger hands back the original
        let receipt = orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();
        match receipt {
            SaleReceipt::Committed(sale) => assert_eq!(sale.id, committed.id),
            other => panic!("expected committed sale, got {:?}", other),
        }
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replayed_sale_is_dated_when_rung_up() {
        let (db, _ledger, orchestrator) = setup().await;
        let receipt = orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();
        let rung_up = match receipt {
            SaleReceipt::Queued(entry) => entry.payload.created_at,
            other => panic!("expected queued sale, got {:?}", other),
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        orchestrator.set_online(true).await;
        orchestrator.drain_pending(TENANT).await.unwrap();

        let committed = db.sales().get_by_client_key(TENANT, "K-1").await.unwrap().unwrap();
        assert_eq!(committed.created_at, rung_up);
    }

    #[tokio::test]
    async fn test_replay_of_already_committed_key_marks_synced() {
        let (db, ledger, orchestrator) = setup().await;
        orchestrator.set_online(true).await;

        // Committed online, but the device also queued it (ack lost)
        ledger.inner.commit_sale(&ctx(), sale("K-2")).await.unwrap();
        orchestrator
            .local()
            .enqueue(PendingSale::new(&ctx(), sale("K-2")))
            .await
            .unwrap();

        let report = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_drain_leaves_failures_pending() {
        let (db, ledger, orchestrator) = setup().await;

        for i in 0..5 {
            orchestrator
                .record_sale(&ctx(), sale(&format!("K-{}", i)))
                .await
                .unwrap();
        }
        ledger.fail_key("K-1");
        ledger.fail_key("K-3");

        orchestrator.set_online(true).await;
        let report = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 2);
        assert!(report.errors.iter().all(|f| !f.stuck));
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 3);

        let pending = orchestrator.local().pending(TENANT, 10).await.unwrap();
        let keys: Vec<_> = pending.iter().map(|e| e.client_key.as_str()).collect();
        assert_eq!(keys, vec!["K-1", "K-3"]);
        assert!(pending.iter().all(|e| e.attempts == 1 && e.status == QueueStatus::Pending));

        let status = orchestrator.status().await;
        assert_eq!(status.queue.pending, 2);
        assert_eq!(status.queue.synced, 3);
    }

    #[tokio::test]
    async fn test_entry_goes_stuck_after_max_attempts_and_still_retries() {
        let (db, ledger, orchestrator) = setup().await;
        let orchestrator = orchestrator.with_policy(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });

        orchestrator.record_sale(&ctx(), sale("K-9")).await.unwrap();
        orchestrator.set_online(true).await;
        ledger.set_down(true);

        let first = orchestrator.drain_pending(TENANT).await.unwrap();
        assert!(!first.errors[0].stuck);

        let second = orchestrator.drain_pending(TENANT).await.unwrap();
        assert!(second.errors[0].stuck);

        let counts = orchestrator.counts(TENANT).await.unwrap();
        assert_eq!(counts.error, 1);
        assert_eq!(counts.pending, 0);

        // Stuck entries are still attempted
        ledger.set_down(false);
        let third = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(third.synced, 1);
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_drain_respects_backoff() {
        let (_db, ledger, orchestrator) = setup().await;
        orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();
        orchestrator.set_online(true).await;

        ledger.set_down(true);
        orchestrator.drain(TENANT, DrainMode::Scheduled).await.unwrap();
        assert_eq!(ledger.commits(), 1);

        // Inside the 2s window
        let report = orchestrator.drain(TENANT, DrainMode::Scheduled).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(ledger.commits(), 1);

        // Immediate drains ignore the window
        ledger.set_down(false);
        let report = orchestrator.drain(TENANT, DrainMode::Immediate).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(ledger.commits(), 2);
    }

    #[tokio::test]
    async fn test_permanent_rejection_flags_entry_immediately() {
        let (_db, _ledger, orchestrator) = setup().await;

        // Bypasses local validation, as a payload from an older build might
        let mut bad = sale("K-bad");
        bad.payments[0].amount = m(100);
        orchestrator
            .local()
            .enqueue(PendingSale::new(&ctx(), bad))
            .await
            .unwrap();

        orchestrator.set_online(true).await;
        let report = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].stuck);
        assert!(report.errors[0].message.contains("PAYMENT_TOTAL_MISMATCH"));

        let entry = orchestrator
            .local()
            .find_by_client_key(TENANT, "K-bad")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, QueueStatus::Error);
        assert_eq!(entry.attempts, 1);
    }

    #[tokio::test]
    async fn test_rejected_entries_do_not_starve_newer_sales() {
        let (db, _ledger, orchestrator) = setup().await;
        let orchestrator = orchestrator.with_batch_size(2);

        for key in ["K-bad-1", "K-bad-2"] {
            let mut bad = sale(key);
            bad.payments[0].amount = m(100);
            orchestrator
                .local()
                .enqueue(PendingSale::new(&ctx(), bad))
                .await
                .unwrap();
        }
        orchestrator.record_sale(&ctx(), sale("K-good")).await.unwrap();
        orchestrator.set_online(true).await;

        // First drain: both rejects go stuck, the good sale still lands
        let report = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.synced, 1);

        // Later sales are not held back by the stuck pair either
        orchestrator.record_sale(&ctx(), sale("K-late")).await.unwrap();
        for _ in 0..3 {
            orchestrator.drain_pending(TENANT).await.unwrap();
        }
        for key in ["K-good", "K-late"] {
            let entry = orchestrator
                .local()
                .find_by_client_key(TENANT, key)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.status, QueueStatus::Synced);
        }
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 2);

        let counts = orchestrator.counts(TENANT).await.unwrap();
        assert_eq!(counts.error, 2);
        assert_eq!(counts.synced, 2);
    }

    #[tokio::test]
    async fn test_drain_walks_past_one_page() {
        let (db, _ledger, orchestrator) = setup().await;
        let orchestrator = orchestrator.with_batch_size(2);
        for i in 0..5 {
            orchestrator
                .record_sale(&ctx(), sale(&format!("K-{}", i)))
                .await
                .unwrap();
        }

        orchestrator.set_online(true).await;
        let report = orchestrator.drain_pending(TENANT).await.unwrap();
        assert_eq!(report.synced, 5);
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_record_sale_paths() {
        let (db, ledger, orchestrator) = setup().await;
        orchestrator.set_online(true).await;

        let receipt = orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();
        assert!(receipt.is_synced());

        // Ledger unreachable: queued instead
        ledger.set_down(true);
        let receipt = orchestrator.record_sale(&ctx(), sale("K-2")).await.unwrap();
        assert!(matches!(receipt, SaleReceipt::Queued(_)));
        ledger.set_down(false);

        // Invalid payload never reaches the ledger or the queue
        let mut bad = sale("K-3");
        bad.items.clear();
        let err = orchestrator.record_sale(&ctx(), bad).await.unwrap_err();
        assert!(err.is_permanent());

        // Business rejection goes back to the caller
        let stranger = OperatorContext::new(TENANT, "no-register");
        let err = orchestrator
            .record_sale(&stranger, sale("K-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Rejected { ref code, .. } if code == "NO_OPEN_REGISTER"));

        let counts = orchestrator.counts(TENANT).await.unwrap();
        assert_eq!(counts.outstanding(), 1);
        assert_eq!(db.sales().count(TENANT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cycle_drains_before_refresh() {
        let (db, _ledger, orchestrator) = setup().await;
        orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();

        // Offline: nothing happens
        let report = orchestrator.run_cycle(TENANT, DrainMode::Scheduled).await.unwrap();
        assert!(!report.attempted);
        assert!(orchestrator.catalog(TENANT).await.unwrap().is_none());

        orchestrator.set_online(true).await;
        let report = orchestrator.run_cycle(TENANT, DrainMode::Scheduled).await.unwrap();
        assert!(report.attempted);
        assert_eq!(report.drain.synced, 1);
        assert_eq!(report.refresh.as_ref().unwrap().varieties, 1);

        // The refreshed snapshot already includes the drained sale's stock
        let snapshot = orchestrator.catalog(TENANT).await.unwrap().unwrap();
        assert_eq!(
            snapshot.variety("tomato").unwrap().stock,
            Some(Quantity::from_units(48))
        );
        let stored = db.catalog().variety(TENANT, "tomato").await.unwrap().unwrap();
        assert_eq!(stored.stock, Some(Quantity::from_units(48)));

        let status = orchestrator.status().await;
        assert!(status.last_sync.is_some());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (_db, ledger, orchestrator) = setup().await;
        orchestrator.set_online(true).await;
        orchestrator.refresh_catalog(TENANT).await.unwrap();

        ledger.set_down(true);
        let report = orchestrator.run_cycle(TENANT, DrainMode::Immediate).await.unwrap();
        assert!(report.refresh.is_none());
        assert!(orchestrator.catalog(TENANT).await.unwrap().is_some());
        assert!(orchestrator.status().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_cycle_purges_old_synced_entries() {
        let (_db, _ledger, orchestrator) = setup().await;
        let orchestrator = orchestrator.with_retention(chrono::Duration::seconds(-1));
        orchestrator.record_sale(&ctx(), sale("K-1")).await.unwrap();

        orchestrator.set_online(true).await;
        let report = orchestrator.run_cycle(TENANT, DrainMode::Immediate).await.unwrap();
        assert_eq!(report.drain.synced, 1);
        assert_eq!(report.purged, 1);
        assert_eq!(orchestrator.counts(TENANT).await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn test_connectivity_edges() {
        let (_db, _ledger, orchestrator) = setup().await;
        assert!(!orchestrator.is_online());
        assert!(orchestrator.set_online(true).await);
        assert!(!orchestrator.set_online(true).await);
        assert!(!orchestrator.set_online(false).await);
        assert!(orchestrator.set_online(true).await);

        orchestrator.set_online(false).await;
        assert!(matches!(
            orchestrator.drain_pending(TENANT).await,
            Err(SyncError::Offline)
        ));
    }
}
