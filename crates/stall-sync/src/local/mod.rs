//! # Local Durable Queue
//!
//! Device-side storage that outlives crashes, restarts and dead batteries:
//! the queue of sales the ledger has not confirmed yet, and the last catalog
//! snapshot the till sells from.
//!
//! ## Guarantees
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue ──► acknowledged only once durably written                    │
//! │                                                                         │
//! │  pending() ──► outstanding entries: pending first, then error,         │
//! │                oldest first within each                                │
//! │  page()    ──► one status, resumable past a cursor                     │
//! │                                                                         │
//! │  mark_synced / mark_failed ──► status moves, entry stays               │
//! │                                                                         │
//! │  purge_synced ──► the ONLY way an entry disappears, and only once      │
//! │                   it is synced and older than retention                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Implementations:
//! - [`SqliteLocalStore`] - production, one SQLite file on the device
//! - [`MemoryLocalStore`] - tests and ephemeral tills

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLocalStore;
pub use sqlite::SqliteLocalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stall_core::{CatalogSnapshot, PendingSale, QueueCounts, QueueEntry, QueueStatus};

use crate::error::SyncResult;

/// Read position inside one status of the queue: everything strictly after
/// `(created_at, id)` comes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePosition {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl QueuePosition {
    pub fn of(entry: &QueueEntry) -> Self {
        QueuePosition {
            created_at: entry.created_at,
            id: entry.id.clone(),
        }
    }
}

/// One page of queue entries with a given status.
#[derive(Debug, Clone, Default)]
pub struct QueuePage {
    pub entries: Vec<QueueEntry>,
    /// Where the next page starts, `None` once the status is exhausted.
    pub next: Option<QueuePosition>,
}

/// Durable device storage.
///
/// A device has a single writer, so implementations only need to be safe
/// against concurrent readers.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Durably appends `sale` as a pending entry.
    ///
    /// Enqueueing a client key that is already queued for the tenant returns
    /// the existing entry untouched.
    async fn enqueue(&self, sale: PendingSale) -> SyncResult<QueueEntry>;

    async fn get(&self, id: &str) -> SyncResult<Option<QueueEntry>>;

    async fn find_by_client_key(
        &self,
        tenant_id: &str,
        client_key: &str,
    ) -> SyncResult<Option<QueueEntry>>;

    /// Outstanding entries: pending ones oldest first, then error ones
    /// oldest first.
    async fn pending(&self, tenant_id: &str, limit: usize) -> SyncResult<Vec<QueueEntry>>;

    /// Up to `limit` entries with `status`, oldest first, strictly after
    /// `after`.
    async fn page(
        &self,
        tenant_id: &str,
        status: QueueStatus,
        after: Option<&QueuePosition>,
        limit: usize,
    ) -> SyncResult<QueuePage>;

    /// Records ledger acceptance. Marking an already synced entry is a no-op.
    async fn mark_synced(&self, id: &str, server_sale_id: &str) -> SyncResult<QueueEntry>;

    /// Records a failed attempt: `attempts += 1`, error message kept. With
    /// `stuck` the entry moves to `error`; otherwise its status is unchanged.
    /// Synced entries are never touched.
    async fn mark_failed(&self, id: &str, error: &str, stuck: bool) -> SyncResult<QueueEntry>;

    /// Operator action: puts an outstanding entry back to `pending` with a
    /// fresh attempt counter.
    async fn requeue(&self, id: &str) -> SyncResult<QueueEntry>;

    async fn counts(&self, tenant_id: &str) -> SyncResult<QueueCounts>;

    /// Deletes synced entries synced before `older_than`. Returns how many.
    async fn purge_synced(&self, older_than: DateTime<Utc>) -> SyncResult<u64>;

    /// Replaces the stored snapshot for the snapshot's tenant, all or nothing.
    async fn replace_catalog(&self, snapshot: &CatalogSnapshot) -> SyncResult<()>;

    /// The last stored snapshot, if a refresh ever succeeded.
    async fn catalog(&self, tenant_id: &str) -> SyncResult<Option<CatalogSnapshot>>;
}

// =============================================================================
// Shared Contract Tests
// =============================================================================
