// Platform detection and command dialect selection, cached per host.

mod commands;

pub use commands::{
    BSD_COMMANDS, CommandDialect, DialectKind, LINUX_COMMANDS, MACOS_COMMANDS, shell_quote,
};

use crate::pool::SessionPool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DETECT_COMMAND: &str = "uname -s";
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    FreeBsd,
    OpenBsd,
    #[serde(rename = "darwin")]
    MacOs,
    Unknown,
}

impl Platform {
    /// Ordered substring match against lower-cased `uname -s` output.
    pub fn from_uname(output: &str) -> Self {
        let lower = output.to_lowercase();
        if lower.contains("linux") {
            Platform::Linux
        } else if lower.contains("freebsd") {
            Platform::FreeBsd
        } else if lower.contains("openbsd") {
            Platform::OpenBsd
        } else if lower.contains("darwin") {
            Platform::MacOs
        } else {
            warn!(uname = %output.trim(), "unknown platform from uname");
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::FreeBsd => "freebsd",
            Platform::OpenBsd => "openbsd",
            Platform::MacOs => "darwin",
            Platform::Unknown => "unknown",
        }
    }

    pub fn is_bsd(&self) -> bool {
        matches!(self, Platform::FreeBsd | Platform::OpenBsd)
    }

    /// Dialect for this family; `Unknown` falls back to Linux.
    pub fn commands(&self) -> &'static CommandDialect {
        match self {
            Platform::Linux | Platform::Unknown => &LINUX_COMMANDS,
            Platform::FreeBsd | Platform::OpenBsd => &BSD_COMMANDS,
            Platform::MacOs => &MACOS_COMMANDS,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detects each host's platform once and remembers it for the process lifetime.
pub struct PlatformResolver {
    pool: Arc<SessionPool>,
    cache: RwLock<HashMap<String, Platform>>,
}

impl PlatformResolver {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Never fails: any detection error yields `Platform::Unknown` for this call.
    /// Only answers actually read from the host are cached.
    pub async fn detect_platform(&self, host: &str) -> Platform {
        if let Some(platform) = self.cached(host) {
            return platform;
        }

        match self
            .pool
            .execute(host, DETECT_COMMAND, Some(DETECT_TIMEOUT))
            .await
        {
            Ok(output) => {
                let platform = Platform::from_uname(output.trim());
                debug!(host, platform = %platform, "platform detected");
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(host.to_string())
                    .or_insert(platform);
                platform
            }
            Err(e) => {
                error!(host, error = %e, "failed to detect platform");
                Platform::Unknown
            }
        }
    }

    pub fn get_commands(&self, platform: Platform) -> &'static CommandDialect {
        platform.commands()
    }

    pub async fn server_commands(&self, host: &str) -> &'static CommandDialect {
        let platform = self.detect_platform(host).await;
        self.get_commands(platform)
    }

    pub fn cached(&self, host: &str) -> Option<Platform> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .copied()
    }
}
