// Host identity and connection parameters

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// A configured remote host. Read-only after load; everything else refers to it by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub name: String,
    pub hostname: String,
    pub username: String,
    pub port: u16,
    /// Identity file handed to the ssh client; `None` uses the agent/default keys.
    pub key_filename: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl HostTarget {
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            username: username.into(),
            port: DEFAULT_SSH_PORT,
            key_filename: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// `user@hostname` destination string for the ssh client.
    pub fn destination(&self) -> String {
        if self.username.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}@{}", self.username, self.hostname)
        }
    }
}

/// Reconnect budget for one host: up to `max_retries` attempts, sleeping
/// `retry_delay * attempt` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based); `None` after the last one.
    pub fn backoff_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then(|| self.retry_delay * attempt)
    }
}
