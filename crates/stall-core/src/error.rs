//! # Error Types
//!
//! Domain error taxonomy shared by the authoritative store and the device.
//!
//! ## Error Classes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Classes                                   │
//! │                                                                         │
//! │  Validation      ValidationError, PaymentTotalMismatch,                 │
//! │                  ItemTotalMismatch                                      │
//! │                  → rejected before any mutation, never retried          │
//! │                                                                         │
//! │  Precondition    NoOpenRegister, RegisterAlreadyOpen                    │
//! │                  → operator must open/close a register first            │
//! │                                                                         │
//! │  Replay          not an error: CommitOutcome::AlreadyCommitted          │
//! │                                                                         │
//! │  Transient       lives in stall-db (DbError) / stall-sync (SyncError)   │
//! │                  → only retried by the drain loop                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised by register and sale operations.
///
/// Every variant is fatal to the current attempt. The caller surfaces it
/// verbatim; automatic retry is never appropriate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Payload failed field-level validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Payments do not add up to the sale total.
    ///
    /// ## When This Occurs
    /// ```text
    /// total = 5000
    /// payments = [cash 3000, debit 1990]   → paid 4990
    ///      │
    ///      ▼
    /// PaymentTotalMismatch { total: 5000, paid: 4990 }
    /// ```
    #[error("Payments total {paid} does not match sale total {total}")]
    PaymentTotalMismatch { total: Money, paid: Money },

    /// Item subtotals do not add up to the sale total.
    #[error("Item subtotals {items} do not match sale total {total}")]
    ItemTotalMismatch { total: Money, items: Money },

    /// The operator has no open register.
    ///
    /// ## When This Occurs
    /// - Committing a sale before opening the drawer
    /// - Closing a register that was already closed
    #[error("No open register for operator {operator_id}")]
    NoOpenRegister { operator_id: String },

    /// The operator already has an open register.
    #[error("Operator {operator_id} already has open register {register_id}")]
    RegisterAlreadyOpen {
        operator_id: String,
        register_id: String,
    },
}

impl CoreError {
    /// Stable error code for the wire contract.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_FAILED",
            CoreError::PaymentTotalMismatch { .. } => "PAYMENT_TOTAL_MISMATCH",
            CoreError::ItemTotalMismatch { .. } => "ITEM_TOTAL_MISMATCH",
            CoreError::NoOpenRegister { .. } => "NO_OPEN_REGISTER",
            CoreError::RegisterAlreadyOpen { .. } => "REGISTER_ALREADY_OPEN",
        }
    }

    /// Returns true for malformed or inconsistent payloads.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::PaymentTotalMismatch { .. }
                | CoreError::ItemTotalMismatch { .. }
        )
    }

    /// Returns true for register state violations.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CoreError::NoOpenRegister { .. } | CoreError::RegisterAlreadyOpen { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Field-level input validation failures.
///
/// `field` carries a path such as `items[2].quantity` so the UI can point at
/// the offending line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field or collection is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Collection has too many entries.
    #[error("{field} must have at most {max} entries")]
    TooMany { field: String, max: usize },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must be zero or more.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Value is above the accepted ceiling.
    #[error("{field} must be at most {max}")]
    TooLarge { field: String, max: String },

    /// A sum of otherwise valid values leaves the amount range.
    #[error("{field} overflow the amount range")]
    Overflow { field: String },

    /// Invalid format (unparseable number, malformed key).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in the allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Supplied subtotal disagrees with quantity x unit price.
    #[error("{field} is {actual}, expected {expected}")]
    SubtotalMismatch {
        field: String,
        expected: Money,
        actual: Money,
    },
}

impl ValidationError {
    pub(crate) fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    pub(crate) fn must_be_positive(field: impl Into<String>) -> Self {
        ValidationError::MustBePositive {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
