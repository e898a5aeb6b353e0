//! # Queue Types
//!
//! Entries of the device-local operation queue.
//!
//! ## Entry State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   enqueue ──► PENDING ──── ledger accepted ────► SYNCED ──► (purged     │
//! │                 │  ▲                                         after      │
//! │        failure  │  │ retry next drain                        retention) │
//! │                 ▼  │                                                    │
//! │           PENDING, attempts += 1                                        │
//! │                 │                                                       │
//! │   attempts ≥ max│                                                       │
//! │                 ▼                                                       │
//! │              ERROR  ── still retried, surfaced to the operator ──►      │
//! │                 │                                                       │
//! │                 └── requeue (operator) ──► PENDING, attempts = 0        │
//! │                                                                         │
//! │   An entry is never deleted before it reaches SYNCED.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::types::{CommitSaleRequest, OperatorContext};

/// What a queue entry replays against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum QueueOperation {
    Sale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum QueueStatus {
    /// Waiting to be replayed.
    Pending,
    /// Accepted by the ledger. Terminal.
    Synced,
    /// Exceeded the attempt threshold. Still retried, needs operator eyes.
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Synced => "synced",
            QueueStatus::Error => "error",
        }
    }

    /// Returns true while the entry still has to reach the ledger.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, QueueStatus::Synced)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sale rung up on the device that the ledger has not confirmed yet.
///
/// `request.client_key` is always set; [`PendingSale::new`] fills it in when
/// the till did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PendingSale {
    pub client_key: String,
    pub tenant_id: String,
    pub operator_id: String,
    pub request: CommitSaleRequest,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PendingSale {
    pub fn new(ctx: &OperatorContext, mut request: CommitSaleRequest) -> Self {
        let client_key = request
            .client_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        request.client_key = Some(client_key.clone());
        let created_at = Utc::now();
        // The ledger dates the sale when it was rung up, not when it synced
        request.occurred_at.get_or_insert(created_at);

        PendingSale {
            client_key,
            tenant_id: ctx.tenant_id.clone(),
            operator_id: ctx.operator_id.clone(),
            request,
            created_at,
        }
    }

    pub fn operator(&self) -> OperatorContext {
        OperatorContext::new(&self.tenant_id, &self.operator_id)
    }
}

/// A row of the local queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueueEntry {
    pub id: String,
    pub tenant_id: String,
    pub operation: QueueOperation,
    pub client_key: String,
    pub payload: PendingSale,
    pub status: QueueStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Filled in once the ledger has committed the sale.
    pub server_sale_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// A fresh pending entry for `sale`.
    pub fn pending(sale: PendingSale) -> Self {
        QueueEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: sale.tenant_id.clone(),
            operation: QueueOperation::Sale,
            client_key: sale.client_key.clone(),
            created_at: sale.created_at,
            payload: sale,
            status: QueueStatus::Pending,
            attempts: 0,
            last_error: None,
            server_sale_id: None,
            last_attempt_at: None,
            synced_at: None,
        }
    }
}

/// Number of entries per status for one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueueCounts {
    pub pending: i64,
    pub synced: i64,
    pub error: i64,
}

impl QueueCounts {
    /// Entries still waiting for the ledger.
    pub fn outstanding(&self) -> i64 {
        self.pending + self.error
    }
}
