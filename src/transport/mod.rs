// Remote-shell transport seam: anything that can open a session to a host and run
// command strings on it.

mod ssh;

pub use ssh::SshConnector;

use crate::error::TransportError;
use crate::models::HostTarget;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// A live connection bound to one host.
///
/// Callers guarantee at most one `run` in flight per session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Cheap liveness check without I/O.
    fn is_closed(&self) -> bool;

    /// Releases the session. Also called on sessions that already report closed.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens sessions. One `connect` call is one attempt; retrying is the pool's job.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &HostTarget) -> Result<Arc<dyn Session>, TransportError>;
}
