//! # stall-sync: Offline Queue and Sync for Stall POS
//!
//! Lets a till keep selling with no signal. Sales go to the ledger when it
//! is reachable and into a durable local queue when it is not; the queue is
//! replayed once connectivity returns, and the catalog snapshot the till
//! sells from is refreshed right after.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncAgent / SyncAgentHandle                      │  │
//! │  │  record_sale • set_online • sync_now • requeue • status          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ SyncScheduler  │  │SyncOrchestrator│  │  LocalStore            │    │
//! │  │                │  │                │  │                        │    │
//! │  │ timer,         │─►│ drain pending, │─►│ durable queue,         │    │
//! │  │ connectivity,  │  │ then refresh   │  │ catalog snapshot       │    │
//! │  │ manual         │  │ catalog        │  │                        │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                    RemoteLedger (DatabaseLedger → stall-db)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent`, its handle, builder and status events
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//! - [`ledger`] - The `RemoteLedger` seam and its database implementation
//! - [`local`] - Durable queue and catalog snapshot
//! - [`orchestrator`] - Drain, refresh, purge and the online/offline switch
//! - [`scheduler`] - Timer and trigger loop
//!
//! ## Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use stall_sync::{DatabaseLedger, SqliteLocalStore, SyncAgentBuilder, SyncConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let local = SqliteLocalStore::open(config.local_db_path()).await?;
//! let mut agent = SyncAgentBuilder::new(config)
//!     .with_local_store(Arc::new(local))
//!     .with_ledger(Arc::new(DatabaseLedger::new(db)))
//!     .build()?;
//!
//! let handle = agent.start().await?;
//! handle.set_online(true).await?;
//! let receipt = handle.record_sale(request).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod ledger;
pub mod local;
pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncEventEmitter, SyncStatus,
    TracingEmitter,
};
pub use config::{SyncConfig, SyncMode};
pub use error::{SyncError, SyncResult};
pub use ledger::{DatabaseLedger, RemoteLedger};
pub use local::{LocalStore, MemoryLocalStore, SqliteLocalStore};
pub use orchestrator::{
    CycleReport, DrainFailure, DrainMode, DrainReport, RefreshReport, RetryPolicy, SaleReceipt,
    SyncOrchestrator,
};
pub use scheduler::{SchedulerHandle, SyncScheduler, SyncTrigger};
