//! Error types for replisql core.

use replisql_sync_engine::SyncError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`], stable for callers that
/// dispatch on the kind of failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid connection options.
    Configuration,
    /// The database or primary could not be reached or opened.
    Connection,
    /// Misuse of a closed or busy object.
    Interface,
    /// Use from the wrong thread.
    Programming,
    /// Error reported by the SQL engine.
    Engine,
    /// Replica synchronization failed.
    Sync,
    /// Sync refused while local work is in progress.
    Conflict,
}

/// Errors that can occur in replisql core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid connection options.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid option.
        message: String,
    },

    /// Database or primary could not be opened.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// Operation on a closed session or cursor, or while a sync is running.
    #[error("interface error: {message}")]
    Interface {
        /// Description of the misuse.
        message: String,
    },

    /// Session used from a thread other than its creator.
    #[error("programming error: {message}")]
    Programming {
        /// Description of the misuse.
        message: String,
    },

    /// Error reported by the SQL engine.
    #[error("engine error: {message}")]
    Engine {
        /// Engine message.
        message: String,
        /// SQLite extended result code, when known.
        code: Option<i32>,
    },

    /// Replica synchronization failed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Sync refused because the open transaction holds uncommitted writes.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A scope exited successfully but the transaction had been marked
    /// rollback-only by an inner failure.
    #[error("transaction rolled back: {reason}")]
    RolledBack {
        /// Why the transaction was rolled back.
        reason: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an interface error.
    pub fn interface(message: impl Into<String>) -> Self {
        Self::Interface {
            message: message.into(),
        }
    }

    /// Creates a programming error.
    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming {
            message: message.into(),
        }
    }

    /// Creates an engine error without a result code.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a rolled-back error.
    pub fn rolled_back(reason: impl Into<String>) -> Self {
        Self::RolledBack {
            reason: reason.into(),
        }
    }

    /// Creates the error returned by operations on a closed session.
    pub fn session_closed() -> Self {
        Self::interface("session is closed")
    }

    /// Creates the error returned by operations on a closed cursor.
    pub fn cursor_closed() -> Self {
        Self::interface("cursor is closed")
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Configuration { .. } => ErrorKind::Configuration,
            CoreError::Connection { .. } => ErrorKind::Connection,
            CoreError::Interface { .. } | CoreError::RolledBack { .. } => ErrorKind::Interface,
            CoreError::Programming { .. } => ErrorKind::Programming,
            CoreError::Engine { .. } => ErrorKind::Engine,
            CoreError::Sync(SyncError::LocalTransactionOpen) | CoreError::Conflict { .. } => {
                ErrorKind::Conflict
            }
            CoreError::Sync(_) => ErrorKind::Sync,
        }
    }

    /// SQLite extended result code, for engine errors.
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            CoreError::Engine { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => CoreError::Engine {
                message: message.unwrap_or_else(|| failure.to_string()),
                code: Some(failure.extended_code),
            },
            other => CoreError::engine(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(CoreError::configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(CoreError::session_closed().kind(), ErrorKind::Interface);
        assert_eq!(CoreError::rolled_back("inner").kind(), ErrorKind::Interface);
        assert_eq!(CoreError::conflict("dirty").kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::from(SyncError::Timeout).kind(), ErrorKind::Sync);
        assert_eq!(
            CoreError::from(SyncError::LocalTransactionOpen).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            CoreError::cursor_closed().to_string(),
            "interface error: cursor is closed"
        );
        assert_eq!(
            CoreError::from(SyncError::NotConnected).to_string(),
            "sync error: not connected to server"
        );
    }

    #[test]
    fn sqlite_failure_keeps_extended_code() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: t.id".into()),
        );
        let core: CoreError = err.into();
        assert_eq!(core.kind(), ErrorKind::Engine);
        assert_eq!(core.engine_code(), Some(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(core.to_string().contains("UNIQUE"));
    }
}
