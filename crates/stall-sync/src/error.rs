//! # Sync Error Types
//!
//! Error types for the device-side queue and the sync orchestrator.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Ledger      │  │     Local Store         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Rejected       │  │  LocalStore             │ │
//! │  │  ConfigLoad     │  │  Unavailable    │  │  EntryNotFound          │ │
//! │  │  ConfigSave     │  │  Offline        │  │  Serialization          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Rejected      → goes back to the caller, never auto-retried live      │
//! │  Unavailable   → sale is queued, drain retries with backoff            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stall_core::CoreError;
use stall_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Tenant or operator not configured.
    #[error("Operator not configured. Set [operator] tenant_id and operator_id.")]
    MissingOperator,

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// The ledger refused the operation on business grounds.
    ///
    /// ## When This Occurs
    /// ```text
    /// replay sale ──► ledger ──► NoOpenRegister
    ///                       └──► PaymentTotalMismatch
    /// ```
    #[error("Rejected by ledger [{code}]: {message}")]
    Rejected { code: String, message: String },

    /// The ledger could not be reached or failed transiently.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The device is known to be offline; nothing was attempted.
    #[error("Device is offline")]
    Offline,

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    #[error("Local store error: {0}")]
    LocalStore(String),

    #[error("Queue entry {id} not found")]
    EntryNotFound { id: String },

    /// Requeue of an entry the ledger already accepted.
    #[error("Queue entry {id} is already synced")]
    AlreadySynced { id: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::Rejected {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Maps an authoritative-store failure onto the ledger categories.
impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        if let Some(domain) = err.as_domain() {
            return SyncError::from(domain.clone());
        }
        if err.is_transient() {
            return SyncError::Unavailable(err.to_string());
        }
        SyncError::Rejected {
            code: "STORE_ERROR".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::LocalStore(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        SyncError::LocalStore(format!("migration failed: {}", err))
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation may succeed when tried again later.
    ///
    /// ## Retryable Errors
    /// - Ledger unreachable or failing transiently
    /// - Device offline
    ///
    /// ## Non-Retryable Errors
    /// - Business rejections from the ledger
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Unavailable(_) | SyncError::Offline)
    }

    /// Returns true for rejections that no amount of retrying will fix.
    ///
    /// A missing open register is not permanent: the operator can open one
    /// and the queued sale goes through on the next drain.
    pub fn is_permanent(&self) -> bool {
        match self {
            SyncError::Rejected { code, .. } => matches!(
                code.as_str(),
                "VALIDATION_FAILED" | "PAYMENT_TOTAL_MISMATCH" | "ITEM_TOTAL_MISMATCH"
            ),
            SyncError::Serialization(_) => true,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingOperator
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
