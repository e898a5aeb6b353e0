//! # SQLite Local Store
//!
//! The production [`LocalStore`]: one SQLite file on the till.
//!
//! ## Durability
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  journal_mode = WAL      readers (status UI) never block the writer     │
//! │  synchronous  = FULL     WAL is fsynced on every commit, so a returned  │
//! │                          enqueue survives power loss                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use stall_core::{
    CatalogSnapshot, Location, PendingSale, QueueCounts, QueueEntry, QueueOperation, QueueStatus,
    Supplier, Variety,
};

use super::{LocalStore, QueuePage, QueuePosition};
use crate::error::{SyncError, SyncResult};

static LOCAL_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/local");

const ENTRY_COLUMNS: &str = "id, tenant_id, operation, client_key, payload, status, attempts, \
     last_error, server_sale_id, created_at, last_attempt_at, synced_at";

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    tenant_id: String,
    operation: QueueOperation,
    client_key: String,
    payload: String,
    status: QueueStatus,
    attempts: i64,
    last_error: Option<String>,
    server_sale_id: Option<String>,
    created_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
    synced_at: Option<DateTime<Utc>>,
}

impl QueueRow {
    fn into_entry(self) -> SyncResult<QueueEntry> {
        let payload: PendingSale = serde_json::from_str(&self.payload)?;
        Ok(QueueEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            operation: self.operation,
            client_key: self.client_key,
            payload,
            status: self.status,
            attempts: self.attempts,
            last_error: self.last_error,
            server_sale_id: self.server_sale_id,
            created_at: self.created_at,
            last_attempt_at: self.last_attempt_at,
            synced_at: self.synced_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    /// Opens (creating if needed) the store at `path` and applies migrations.
    pub async fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SyncError::LocalStore(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Local store opened");
        Self::migrate(pool).await
    }

    /// A throwaway store for tests. Single connection, gone when dropped.
    pub async fn in_memory() -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> SyncResult<Self> {
        LOCAL_MIGRATOR.run(&pool).await?;
        Ok(SqliteLocalStore { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn require(&self, id: &str) -> SyncResult<QueueEntry> {
        self.get(id)
            .await?
            .ok_or_else(|| SyncError::EntryNotFound { id: id.to_string() })
    }

    /// Decodes outstanding rows. A row whose payload no longer parses is
    /// moved to `error` with the decode message and left out, so it cannot
    /// block the rest of the queue.
    async fn decode_outstanding(&self, rows: Vec<QueueRow>) -> SyncResult<Vec<QueueEntry>> {
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match row.into_entry() {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(entry_id = %id, error = %e, "Unreadable queue entry, flagging as error");
                    self.flag_unreadable(&id, &e.to_string()).await?;
                }
            }
        }
        Ok(entries)
    }

    async fn flag_unreadable(&self, id: &str, message: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'error', last_error = ?2
            WHERE id = ?1 AND status != 'synced'
            "#,
        )
        .bind(id)
        .bind(format!("unreadable payload: {}", message))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn enqueue(&self, sale: PendingSale) -> SyncResult<QueueEntry> {
        let entry = QueueEntry::pending(sale);
        let payload = serde_json::to_string(&entry.payload)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO queue_entries (
                id, tenant_id, operation, client_key, payload, status, attempts, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
            ON CONFLICT (tenant_id, client_key) DO NOTHING
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id)
        .bind(entry.operation)
        .bind(&entry.client_key)
        .bind(&payload)
        .bind(entry.status)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(client_key = %entry.client_key, "Client key already queued");
        } else {
            info!(entry_id = %entry.id, client_key = %entry.client_key, "Sale queued");
        }

        self.find_by_client_key(&entry.tenant_id, &entry.client_key)
            .await?
            .ok_or_else(|| SyncError::EntryNotFound { id: entry.id })
    }

    async fn get(&self, id: &str) -> SyncResult<Option<QueueEntry>> {
        let row: Option<QueueRow> =
            sqlx::query_as(&format!("SELECT {} FROM queue_entries WHERE id = ?1", ENTRY_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    async fn find_by_client_key(
        &self,
        tenant_id: &str,
        client_key: &str,
    ) -> SyncResult<Option<QueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "SELECT {} FROM queue_entries WHERE tenant_id = ?1 AND client_key = ?2",
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(client_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    async fn pending(&self, tenant_id: &str, limit: usize) -> SyncResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM queue_entries
            WHERE tenant_id = ?1 AND status IN ('pending', 'error')
            ORDER BY CASE status WHEN 'pending' THEN 0 ELSE 1 END, created_at, id
            LIMIT ?2
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        self.decode_outstanding(rows).await
    }

    async fn page(
        &self,
        tenant_id: &str,
        status: QueueStatus,
        after: Option<&QueuePosition>,
        limit: usize,
    ) -> SyncResult<QueuePage> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM queue_entries
            WHERE tenant_id = ?1 AND status = ?2
              AND (?3 IS NULL OR created_at > ?3 OR (created_at = ?3 AND id > ?4))
            ORDER BY created_at, id
            LIMIT ?5
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(status)
        .bind(after.map(|p| p.created_at))
        .bind(after.map(|p| p.id.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        // The cursor follows the raw rows, unreadable ones included
        let next = if limit > 0 && rows.len() == limit {
            rows.last().map(|row| QueuePosition {
                created_at: row.created_at,
                id: row.id.clone(),
            })
        } else {
            None
        };

        let entries = self.decode_outstanding(rows).await?;
        Ok(QueuePage { entries, next })
    }

    async fn mark_synced(&self, id: &str, server_sale_id: &str) -> SyncResult<QueueEntry> {
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'synced', server_sale_id = ?2, synced_at = ?3, last_error = NULL
            WHERE id = ?1 AND status != 'synced'
            "#,
        )
        .bind(id)
        .bind(server_sale_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.require(id).await
    }

    async fn mark_failed(&self, id: &str, error: &str, stuck: bool) -> SyncResult<QueueEntry> {
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET attempts = attempts + 1,
                last_error = ?2,
                last_attempt_at = ?3,
                status = CASE WHEN ?4 THEN 'error' ELSE status END
            WHERE id = ?1 AND status != 'synced'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .bind(stuck)
        .execute(&self.pool)
        .await?;

        self.require(id).await
    }

    async fn requeue(&self, id: &str) -> SyncResult<QueueEntry> {
        let entry = self.require(id).await?;
        if entry.status == QueueStatus::Synced {
            return Err(SyncError::AlreadySynced { id: id.to_string() });
        }

        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'pending', attempts = 0, last_error = NULL, last_attempt_at = NULL
            WHERE id = ?1 AND status != 'synced'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(entry_id = %id, "Queue entry requeued");
        self.require(id).await
    }

    async fn counts(&self, tenant_id: &str) -> SyncResult<QueueCounts> {
        let rows: Vec<(QueueStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM queue_entries WHERE tenant_id = ?1 GROUP BY status",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status {
                QueueStatus::Pending => counts.pending = count,
                QueueStatus::Synced => counts.synced = count,
                QueueStatus::Error => counts.error = count,
            }
        }
        Ok(counts)
    }

    async fn purge_synced(&self, older_than: DateTime<Utc>) -> SyncResult<u64> {
        let purged = sqlx::query(
            "DELETE FROM queue_entries WHERE status = 'synced' AND synced_at < ?1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if purged > 0 {
            info!(purged, "Purged synced queue entries");
        }
        Ok(purged)
    }

    async fn replace_catalog(&self, snapshot: &CatalogSnapshot) -> SyncResult<()> {
        let tenant_id = snapshot.tenant_id.as_str();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM catalog_entries WHERE tenant_id = ?1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        let mut rows: Vec<(&str, &str, String)> = Vec::new();
        for variety in &snapshot.varieties {
            rows.push(("variety", variety.id.as_str(), serde_json::to_string(variety)?));
        }
        for supplier in &snapshot.suppliers {
            rows.push(("supplier", supplier.id.as_str(), serde_json::to_string(supplier)?));
        }
        for location in &snapshot.locations {
            rows.push(("location", location.id.as_str(), serde_json::to_string(location)?));
        }

        for (position, (kind, id, payload)) in rows.into_iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO catalog_entries (tenant_id, kind, id, position, payload)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(tenant_id)
            .bind(kind)
            .bind(id)
            .bind(position as i64)
            .bind(payload)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO catalog_refreshes (tenant_id, fetched_at) VALUES (?1, ?2)
            ON CONFLICT (tenant_id) DO UPDATE SET fetched_at = excluded.fetched_at
            "#,
        )
        .bind(tenant_id)
        .bind(snapshot.fetched_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            tenant_id = %tenant_id,
            varieties = snapshot.varieties.len(),
            "Catalog snapshot stored"
        );
        Ok(())
    }

    async fn catalog(&self, tenant_id: &str) -> SyncResult<Option<CatalogSnapshot>> {
        let mut tx = self.pool.begin().await?;

        let fetched_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT fetched_at FROM catalog_refreshes WHERE tenant_id = ?1")
                .bind(tenant_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(fetched_at) = fetched_at else {
            return Ok(None);
        };

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT kind, payload FROM catalog_entries WHERE tenant_id = ?1 ORDER BY position",
        )
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut snapshot = CatalogSnapshot::empty(tenant_id);
        snapshot.fetched_at = fetched_at;
        for (kind, payload) in rows {
            match kind.as_str() {
                "variety" => snapshot.varieties.push(serde_json::from_str::<Variety>(&payload)?),
                "supplier" => snapshot.suppliers.push(serde_json::from_str::<Supplier>(&payload)?),
                "location" => snapshot.locations.push(serde_json::from_str::<Location>(&payload)?),
                other => {
                    return Err(SyncError::LocalStore(format!(
                        "unknown catalog entry kind '{}'",
                        other
                    )))
                }
            }
        }

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::contract;

    #[tokio::test]
    async fn test_enqueue_is_idempotent_per_tenant() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        contract::enqueue_is_idempotent_per_tenant(&store).await;
    }

    #[tokio::test]
    async fn test_pending_is_fifo_and_includes_errors() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        contract::pending_is_fifo_and_includes_errors(&store).await;
    }

    #[tokio::test]
    async fn test_paging() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        contract::paging_resumes_after_cursor(&store).await;
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_flagged_not_fatal() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        let mut broken = contract::sale("t1", "broken");
        broken.created_at = broken.created_at - chrono::Duration::seconds(1);
        let broken = store.enqueue(broken).await.unwrap();
        let good = store.enqueue(contract::sale("t1", "good")).await.unwrap();

        sqlx::query("UPDATE queue_entries SET payload = '{not json' WHERE id = ?1")
            .bind(&broken.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let pending = store.pending("t1", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, good.id);

        let page = store.page("t1", QueueStatus::Pending, None, 10).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].id, good.id);

        let counts = store.counts("t1").await.unwrap();
        assert_eq!(counts.error, 1);
        assert_eq!(counts.pending, 1);
        let flagged: (String, Option<String>) =
            sqlx::query_as("SELECT status, last_error FROM queue_entries WHERE id = ?1")
                .bind(&broken.id)
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(flagged.0, "error");
        assert!(flagged.1.unwrap().starts_with("unreadable payload"));
    }

    #[tokio::test]
    async fn test_failure_bookkeeping() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        contract::failure_bookkeeping(&store).await;
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_synced() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        contract::purge_only_removes_old_synced(&store).await;
    }

    #[tokio::test]
    async fn test_catalog_replacement() {
        let store = SqliteLocalStore::in_memory().await.unwrap();
        contract::catalog_replacement(&store).await;
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let path = std::env::temp_dir().join(format!("stall-local-{}.db", uuid::Uuid::new_v4()));

        let store = SqliteLocalStore::open(&path).await.unwrap();
        let entry = store.enqueue(contract::sale("t1", "k1")).await.unwrap();
        store.mark_failed(&entry.id, "offline", false).await.unwrap();
        store.close().await;

        let reopened = SqliteLocalStore::open(&path).await.unwrap();
        let pending = reopened.pending("t1", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, entry.id);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].payload, entry.payload);
        reopened.close().await;

        let _ = std::fs::remove_file(&path);
    }
}
