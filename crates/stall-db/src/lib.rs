//! # stall-db: Authoritative Store for Stall POS
//!
//! Registers, sales and the catalog, stored in SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stall POS Data Flow                              │
//! │                                                                         │
//! │  Device (stall-sync)                                                   │
//! │       │ commit_sale / fetch_catalog                                    │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     stall-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │◄───│ RegisterRepository │  │ (embedded) │  │   │
//! │  │   │  SqlitePool   │    │ SaleRepository     │  │            │  │   │
//! │  │   │               │    │ CatalogRepository  │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stall_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("authority.db")).await?;
//! let register = db.registers().open(&ctx, request).await?;
//! let outcome = db.sales().commit(&ctx, sale).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::register::RegisterRepository;
pub use repository::sale::SaleRepository;
