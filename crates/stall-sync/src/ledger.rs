//! # Remote Ledger
//!
//! The seam between the device and the authoritative store.
//!
//! ```text
//! SyncOrchestrator ──► RemoteLedger ──► DatabaseLedger ──► stall-db
//!                                   └─► (test doubles)
//! ```
//!
//! Errors come back already sorted: [`SyncError::Rejected`] for business
//! refusals, [`SyncError::Unavailable`] for anything worth retrying.

use async_trait::async_trait;
use tracing::debug;

use stall_core::{CatalogSnapshot, CommitOutcome, CommitSaleRequest, OperatorContext};
use stall_db::Database;

use crate::error::{SyncError, SyncResult};

#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Commits a sale. Replaying a client key the ledger already holds
    /// returns [`CommitOutcome::AlreadyCommitted`] with the original sale.
    async fn commit_sale(
        &self,
        ctx: &OperatorContext,
        request: CommitSaleRequest,
    ) -> SyncResult<CommitOutcome>;

    /// Current catalog for the tenant.
    async fn fetch_catalog(&self, tenant_id: &str) -> SyncResult<CatalogSnapshot>;
}

/// Ledger backed directly by the authoritative SQLite store.
#[derive(Debug, Clone)]
pub struct DatabaseLedger {
    db: Database,
}

impl DatabaseLedger {
    pub fn new(db: Database) -> Self {
        DatabaseLedger { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl RemoteLedger for DatabaseLedger {
    async fn commit_sale(
        &self,
        ctx: &OperatorContext,
        request: CommitSaleRequest,
    ) -> SyncResult<CommitOutcome> {
        let outcome = self.db.sales().commit(ctx, request).await?;
        debug!(
            sale_id = %outcome.sale().id,
            replay = outcome.is_replay(),
            "Ledger commit"
        );
        Ok(outcome)
    }

    async fn fetch_catalog(&self, tenant_id: &str) -> SyncResult<CatalogSnapshot> {
        self.db
            .catalog()
            .snapshot(tenant_id)
            .await
            .map_err(SyncError::from)
    }
}
