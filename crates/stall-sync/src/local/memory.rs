//! In-process [`LocalStore`] for tests and ephemeral tills. Nothing survives
//! a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use stall_core::{CatalogSnapshot, PendingSale, QueueCounts, QueueEntry, QueueStatus};

use super::{LocalStore, QueuePage, QueuePosition};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Default)]
struct State {
    /// Insertion order doubles as FIFO order for equal timestamps.
    entries: Vec<QueueEntry>,
    catalogs: HashMap<String, CatalogSnapshot>,
}

impl State {
    fn entry_mut(&mut self, id: &str) -> SyncResult<&mut QueueEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SyncError::EntryNotFound { id: id.to_string() })
    }
}

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    state: Mutex<State>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn enqueue(&self, sale: PendingSale) -> SyncResult<QueueEntry> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .entries
            .iter()
            .find(|e| e.tenant_id == sale.tenant_id && e.client_key == sale.client_key)
        {
            return Ok(existing.clone());
        }

        let entry = QueueEntry::pending(sale);
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: &str) -> SyncResult<Option<QueueEntry>> {
        let state = self.state.lock().await;
        Ok(state.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_client_key(
        &self,
        tenant_id: &str,
        client_key: &str,
    ) -> SyncResult<Option<QueueEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.client_key == client_key)
            .cloned())
    }

    async fn pending(&self, tenant_id: &str, limit: usize) -> SyncResult<Vec<QueueEntry>> {
        let state = self.state.lock().await;
        let mut outstanding: Vec<QueueEntry> = state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.status.is_outstanding())
            .cloned()
            .collect();
        // Stable sort keeps insertion order on ties
        outstanding.sort_by_key(|e| (e.status == QueueStatus::Error, e.created_at));
        outstanding.truncate(limit);
        Ok(outstanding)
    }

    async fn page(
        &self,
        tenant_id: &str,
        status: QueueStatus,
        after: Option<&QueuePosition>,
        limit: usize,
    ) -> SyncResult<QueuePage> {
        let state = self.state.lock().await;
        let mut entries: Vec<QueueEntry> = state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.status == status)
            .filter(|e| match after {
                Some(pos) => (e.created_at, e.id.as_str()) > (pos.created_at, pos.id.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        entries.truncate(limit);

        let next = if limit > 0 && entries.len() == limit {
            entries.last().map(QueuePosition::of)
        } else {
            None
        };
        Ok(QueuePage { entries, next })
    }

    async fn mark_synced(&self, id: &str, server_sale_id: &str) -> SyncResult<QueueEntry> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(id)?;
        if entry.status != QueueStatus::Synced {
            entry.status = QueueStatus::Synced;
            entry.server_sale_id = Some(server_sale_id.to_string());
            entry.synced_at = Some(Utc::now());
            entry.last_error = None;
        }
        Ok(entry.clone())
    }

    async fn mark_failed(&self, id: &str, error: &str, stuck: bool) -> SyncResult<QueueEntry> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(id)?;
        if entry.status != QueueStatus::Synced {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.last_attempt_at = Some(Utc::now());
            if stuck {
                entry.status = QueueStatus::Error;
            }
        }
        Ok(entry.clone())
    }

    async fn requeue(&self, id: &str) -> SyncResult<QueueEntry> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(id)?;
        if entry.status == QueueStatus::Synced {
            return Err(SyncError::AlreadySynced { id: id.to_string() });
        }
        entry.status = QueueStatus::Pending;
        entry.attempts = 0;
        entry.last_error = None;
        entry.last_attempt_at = None;
        Ok(entry.clone())
    }

    async fn counts(&self, tenant_id: &str) -> SyncResult<QueueCounts> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for entry in state.entries.iter().filter(|e| e.tenant_id == tenant_id) {
            match entry.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Synced => counts.synced += 1,
                QueueStatus::Error => counts.error += 1,
            }
        }
        Ok(counts)
    }

    async fn purge_synced(&self, older_than: DateTime<Utc>) -> SyncResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|e| {
            !(e.status == QueueStatus::Synced && e.synced_at.is_some_and(|at| at < older_than))
        });
        Ok((before - state.entries.len()) as u64)
    }

    async fn replace_catalog(&self, snapshot: &CatalogSnapshot) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state
            .catalogs
            .insert(snapshot.tenant_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn catalog(&self, tenant_id: &str) -> SyncResult<Option<CatalogSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.catalogs.get(tenant_id).cloned())
    }
}
