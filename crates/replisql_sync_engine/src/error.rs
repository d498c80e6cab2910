//! Error types for the sync engine.

use replisql_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether a later attempt may succeed.
        retryable: bool,
    },

    /// Protocol error (invalid message format or ordering).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The primary rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The primary failed to serve the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// A request exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// The transport has been closed.
    #[error("not connected to server")]
    NotConnected,

    /// The primary speaks another protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// The primary reported a watermark below the replica's.
    #[error("remote watermark {remote} is behind local watermark {local}")]
    WatermarkRegressed {
        /// Local watermark.
        local: u64,
        /// Watermark the primary reported.
        remote: u64,
    },

    /// The local database has an open transaction, changes cannot be applied.
    #[error("local transaction is open")]
    LocalTransactionOpen,

    /// Applying changes to the local database failed.
    #[error("apply failed: {0}")]
    Apply(String),

    /// A sync is already running on this engine.
    #[error("sync already in progress")]
    InProgress,

    /// Replica info record could not be read or written.
    #[error("replica info I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed.
    ///
    /// The engine never retries on its own; callers decide.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::LocalTransactionOpen => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad url").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::AuthenticationFailed("401".into()).is_retryable());
        assert!(!SyncError::WatermarkRegressed {
            local: 5,
            remote: 3
        }
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::VersionMismatch {
            local: 1,
            remote: 2,
        };
        assert_eq!(
            err.to_string(),
            "protocol version mismatch: local=1, remote=2"
        );

        let err: SyncError = ProtocolError::decoding("eof").into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
