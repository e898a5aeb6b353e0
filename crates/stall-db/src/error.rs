//! # Database Error Types
//!
//! Error types for authoritative store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)          Domain rule (CoreError)           │
//! │       │                                     │                           │
//! │       ▼                                     ▼                           │
//! │  DbError (this module) ◄────────────────────┘                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (stall-sync) ← retryable vs rejected                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Queue entry stays pending, or the till shows the error code           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stall_core::CoreError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// A business rule rejected the operation before anything was written.
    ///
    /// ## When This Occurs
    /// - Sale payload fails validation
    /// - Payments do not match the total
    /// - No open register / register already open
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - A second open register for the same operator
    /// - A second sale with the same client key
    /// - Duplicate catalog id on seeding
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Sale item referencing a variety outside the catalog
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt row in {table}: {message}")]
    Decode { table: String, message: String },

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn decode(table: impl Into<String>, message: impl ToString) -> Self {
        DbError::Decode {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if the UNIQUE constraint named by `needle` was violated.
    ///
    /// `needle` is matched against SQLite's `table.column` list, e.g.
    /// `"sales.client_key"`.
    pub fn is_unique_violation_on(&self, needle: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.contains(needle))
    }

    /// Returns the domain error, if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            DbError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true for infrastructure failures that may succeed on retry.
    ///
    /// Domain rejections and constraint violations are permanent for the
    /// same input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::ConnectionFailed(_)
                | DbError::PoolExhausted
                | DbError::QueryFailed(_)
                | DbError::Internal(_)
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::ColumnDecode   → DbError::Decode
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::ColumnDecode { index, source } => DbError::Decode {
                table: "unknown".to_string(),
                message: format!("column {}: {}", index, source),
            },

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stall_core::Money;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::PoolExhausted.is_transient());
        assert!(DbError::ConnectionFailed("disk".into()).is_transient());
        assert!(!DbError::duplicate("sales.client_key", "abc").is_transient());

        let domain = DbError::from(CoreError::PaymentTotalMismatch {
            total: Money::from_minor(5000),
            paid: Money::from_minor(4990),
        });
        assert!(!domain.is_transient());
        assert_eq!(domain.as_domain().map(|e| e.code()), Some("PAYMENT_TOTAL_MISMATCH"));
    }

    #[test]
    fn test_unique_violation_match() {
        let err = DbError::duplicate("sales.tenant_id, sales.client_key", "unknown");
        assert!(err.is_unique_violation_on("sales.client_key"));
        assert!(!err.is_unique_violation_on("registers.operator_id"));
    }
}
