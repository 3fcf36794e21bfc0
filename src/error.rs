// Error types for the transport and session pool layers.

use std::time::Duration;

/// Failure reported by a remote-shell transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The local ssh client could not be spawned or its pipes failed.
    #[error("ssh client I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ssh client itself failed (exit status 255 or a refused connection).
    #[error("ssh client failed with status {status}: {stderr}")]
    Client { status: i32, stderr: String },

    /// The session was closed before or during the call.
    #[error("session is closed")]
    SessionClosed,

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by [`crate::pool::SessionPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("server '{0}' not configured")]
    NotConfigured(String),

    /// Terminal: the pool was closed and rejects every further operation.
    #[error("connection pool is closed")]
    Closed,

    #[error("failed to connect to {host} after {attempts} attempts: {source}")]
    Connection {
        host: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("command on {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    /// The session broke mid-command; it has been dropped and the next call reconnects.
    #[error("command execution failed on {host}: {source}")]
    Transport {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("batch output from {host} had {found} segments, expected {expected}")]
    BatchFraming {
        host: String,
        expected: usize,
        found: usize,
    },
}

impl PoolError {
    /// True for errors caused by an unreachable or broken session.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, PoolError::Connection { .. } | PoolError::Transport { .. })
    }
}
