//! Error types for ledger operations.

use std::fmt;

use thiserror::Error;

use crate::db::DbError;

/// Structured classification for ledger storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl LedgerDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for LedgerDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> LedgerDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return LedgerDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return LedgerDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return LedgerDbErrorKind::BusyOrLocked;
    }

    LedgerDbErrorKind::Other
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database operation failed.
    #[error("ledger database error ({kind}): {message}")]
    Database {
        /// Typed classification of the failure.
        kind: LedgerDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// The ledger database could not be opened or migrated.
    #[error("failed to open ledger: {0}")]
    Open(#[from] DbError),

    /// The ledger directory could not be prepared.
    #[error("ledger directory {path}: {source}")]
    Directory {
        /// Directory that failed.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A stored value could not be encoded or decoded.
    #[error("ledger value for key '{key}' is not valid JSON: {source}")]
    Value {
        /// Key whose value failed.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The ledger has been closed.
    #[error("ledger is closed")]
    Closed,
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: LedgerDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl LedgerError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<LedgerDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(LedgerDbErrorKind::BusyOrLocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_message() {
        let err = LedgerError::Database {
            kind: LedgerDbErrorKind::Other,
            message: "disk I/O error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ledger database error"));
        assert!(msg.contains("other"));
        assert!(msg.contains("disk I/O error"));
    }

    #[test]
    fn test_busy_flag() {
        let err = LedgerError::Database {
            kind: LedgerDbErrorKind::BusyOrLocked,
            message: "database is locked".to_string(),
        };
        assert!(err.is_busy_or_locked());
        assert!(!LedgerError::Closed.is_busy_or_locked());
    }

    #[test]
    fn test_from_sqlx_pool_closed() {
        let err = LedgerError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.database_kind(), Some(LedgerDbErrorKind::PoolClosed));
    }
}
