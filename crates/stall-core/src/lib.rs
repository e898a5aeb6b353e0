//! # stall-core: Domain Model for Stall POS
//!
//! Pure types and arithmetic for a point-of-sale backend that keeps working
//! on market stalls with flaky connectivity. No I/O lives here: the store
//! crates (`stall-db`, `stall-sync`) feed data in and persist what comes out.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stall POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 stall-sync (device side)                        │   │
//! │  │   LocalStore (queue + catalog snapshot) ─► SyncOrchestrator     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ RemoteLedger                           │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stall-db (authoritative store)                  │   │
//! │  │   RegisterRepository ─► SaleRepository ─► CatalogRepository     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stall-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌──────────────┐ ┌──────────┐  │   │
//! │  │   │   types   │  │   money   │  │reconciliation│ │validation│  │   │
//! │  │   │  Register │  │   Money   │  │  summarize   │ │  rules   │  │   │
//! │  │   │   Sale    │  │ Quantity  │  │              │ │          │  │   │
//! │  │   └───────────┘  └───────────┘  └──────────────┘ └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Registers, sales, catalog entities, wire requests
//! - [`queue`] - Local queue entries and pending sales
//! - [`money`] - Money in integer minor units
//! - [`quantity`] - Fractional quantities in thousandths
//! - [`reconciliation`] - Register close arithmetic
//! - [`validation`] - Sale and register input rules
//! - [`error`] - Domain error taxonomy
//!
//! ## Example Usage
//!
//! ```rust
//! use stall_core::{Money, Quantity};
//!
//! // 1.250 kg of tomatoes at 1.80 per kg
//! let qty: Quantity = "1.25".parse().unwrap();
//! let subtotal = qty.price(Money::from_minor(180)).unwrap();
//! assert_eq!(subtotal.minor(), 225);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod quantity;
pub mod queue;
pub mod reconciliation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use quantity::Quantity;
pub use queue::*;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines in a single sale.
pub const MAX_SALE_ITEMS: usize = 200;

/// Maximum number of payments splitting a single sale.
pub const MAX_SALE_PAYMENTS: usize = 16;

/// Allowed gap between a sale total and the sums it must match.
///
/// Amounts are integer minor units, so anything under one minor unit
/// collapses to an exact match.
pub const TOTAL_TOLERANCE: Money = Money::zero();

/// Largest unit price, line subtotal or payment a sale may carry.
pub const MAX_AMOUNT: Money = Money::from_minor(100_000_000_000);

/// Largest quantity on a single line, in whole units.
pub const MAX_QUANTITY_UNITS: i64 = 1_000_000;

/// Maximum length of a client-generated idempotency key.
pub const MAX_CLIENT_KEY_LEN: usize = 128;

/// Maximum length of free-text register notes.
pub const MAX_NOTES_LEN: usize = 1000;
