//! Ledger double for scheduler and agent tests that must not touch SQLite
//! (those tests run on paused time).

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use stall_core::{CatalogSnapshot, CommitOutcome, CommitSaleRequest, OperatorContext, Sale};

use crate::error::{SyncError, SyncResult};
use crate::ledger::RemoteLedger;

pub(crate) struct RecordingLedger {
    down: AtomicBool,
    committed_keys: Mutex<Vec<String>>,
    catalog_fetches: AtomicUsize,
}

impl RecordingLedger {
    pub fn new() -> Self {
        RecordingLedger {
            down: AtomicBool::new(false),
            committed_keys: Mutex::new(Vec::new()),
            catalog_fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn committed_keys(&self) -> Vec<String> {
        self.committed_keys.lock().unwrap().clone()
    }

    pub fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLedger for RecordingLedger {
    async fn commit_sale(
        &self,
        ctx: &OperatorContext,
        request: CommitSaleRequest,
    ) -> SyncResult<CommitOutcome> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("connection refused".into()));
        }
        let key = request.client_key.clone().unwrap_or_default();
        self.committed_keys.lock().unwrap().push(key);

        Ok(CommitOutcome::Created(Sale {
            id: Uuid::new_v4().to_string(),
            client_key: request.client_key.clone(),
            tenant_id: ctx.tenant_id.clone(),
            operator_id: ctx.operator_id.clone(),
            register_id: "reg-1".into(),
            location_id: request.location_id.clone(),
            total: request.total,
            stock_reconciliation_pending: false,
            created_at: Utc::now(),
            items: Vec::new(),
            payments: Vec::new(),
        }))
    }

    async fn fetch_catalog(&self, tenant_id: &str) -> SyncResult<CatalogSnapshot> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("connection refused".into()));
        }
        self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(CatalogSnapshot::empty(tenant_id))
    }
}
