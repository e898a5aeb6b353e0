//! # Repository Module
//!
//! Database repository implementations for the authoritative store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DatabaseLedger / stall-node                                           │
//! │       │                                                                 │
//! │       │  db.sales().commit(&ctx, request)                              │
//! │       ▼                                                                 │
//! │  RegisterRepository      SaleRepository        CatalogRepository       │
//! │  ├── open                ├── commit            ├── snapshot            │
//! │  ├── current             ├── get_by_id         ├── varieties           │
//! │  ├── close               ├── get_by_client_key ├── suppliers           │
//! │  ├── closure             ├── list_for_register ├── locations           │
//! │  └── list_closed         └── stock_discrepancies└── insert_*           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (one transaction per mutating call)                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are read into private `*Row` structs with `sqlx::FromRow` and
//! converted to `stall-core` types at the repository boundary.
//!
//! ## Write Transactions
//! Mutating calls begin with `BEGIN IMMEDIATE`, taking the write lock up
//! front. Two commits racing on one client key then queue on the busy
//! timeout and the second sees the first one's row, instead of failing on
//! a stale WAL snapshot.

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::DbResult;

pub mod catalog;
pub mod register;
pub mod sale;

/// Starts a transaction that holds the write lock from its first statement.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
