use crate::models::{DEFAULT_SSH_PORT, HostTarget, RetryPolicy};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector names the binary knows how to build.
pub const KNOWN_COLLECTORS: [&str; 5] =
    ["database", "process", "service", "system", "webserver"];

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub collectors: BTreeMap<String, CollectorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Render interval, also the cache window of every collector.
    pub poll_interval_secs: f64,
    pub connection_timeout_secs: f64,
    pub command_timeout_secs: f64,
    pub retry_attempts: u32,
    pub retry_delay_secs: f64,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2.0,
            connection_timeout_secs: 30.0,
            command_timeout_secs: 10.0,
            retry_attempts: 3,
            retry_delay_secs: 2.0,
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub hostname: String,
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub key_filename: Option<String>,
    /// Informational only.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub interval_secs: Option<f64>,
    /// Process name patterns (`process` collector).
    #[serde(default)]
    pub monitored: Vec<String>,
    /// Service names (`service` collector).
    #[serde(default)]
    pub services: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let g = &self.general;
        for (key, value) in [
            ("general.poll_interval_secs", g.poll_interval_secs),
            ("general.connection_timeout_secs", g.connection_timeout_secs),
            ("general.command_timeout_secs", g.command_timeout_secs),
            ("general.retry_delay_secs", g.retry_delay_secs),
        ] {
            ensure_positive(key, value)?;
        }
        anyhow::ensure!(
            g.retry_attempts > 0,
            "general.retry_attempts must be > 0, got {}",
            g.retry_attempts
        );

        anyhow::ensure!(!self.servers.is_empty(), "servers must list at least one server");
        let mut seen = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            anyhow::ensure!(
                !server.name.trim().is_empty(),
                "servers[{}].name must be non-empty",
                i
            );
            anyhow::ensure!(
                seen.insert(server.name.as_str()),
                "servers[{}].name '{}' is a duplicate",
                i,
                server.name
            );
            anyhow::ensure!(
                !server.hostname.trim().is_empty(),
                "servers[{}].hostname must be non-empty",
                i
            );
            anyhow::ensure!(
                !server.username.trim().is_empty(),
                "servers[{}].username must be non-empty",
                i
            );
            anyhow::ensure!(
                server.port > 0,
                "servers[{}].port must be between 1 and 65535, got {}",
                i,
                server.port
            );
        }

        for (name, collector) in &self.collectors {
            anyhow::ensure!(
                KNOWN_COLLECTORS.contains(&name.as_str()),
                "collectors.{} is not a known collector (expected one of {})",
                name,
                KNOWN_COLLECTORS.join(", ")
            );
            if let Some(interval) = collector.interval_secs {
                ensure_positive(&format!("collectors.{name}.interval_secs"), interval)?;
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.general.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.general.command_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.general.retry_attempts,
            retry_delay: Duration::from_secs_f64(self.general.retry_delay_secs),
        }
    }

    pub fn host_targets(&self) -> Vec<HostTarget> {
        let connect_timeout = Duration::from_secs_f64(self.general.connection_timeout_secs);
        self.servers
            .iter()
            .map(|server| HostTarget {
                name: server.name.clone(),
                hostname: server.hostname.clone(),
                username: server.username.clone(),
                port: server.port,
                key_filename: server.key_filename.as_deref().map(expand_home),
                connect_timeout,
            })
            .collect()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn collector(&self, name: &str) -> Option<&CollectorConfig> {
        self.collectors.get(name)
    }

    /// Collectors without a section are enabled.
    pub fn collector_enabled(&self, name: &str) -> bool {
        self.collector(name).is_none_or(|c| c.enabled)
    }

    /// Configured interval overrides; collectors absent here use their own default.
    pub fn collector_intervals(&self) -> HashMap<String, Duration> {
        self.collectors
            .iter()
            .filter_map(|(name, c)| {
                c.interval_secs
                    .map(|secs| (name.clone(), Duration::from_secs_f64(secs)))
            })
            .collect()
    }
}

/// Shortest interval or timeout the monitor accepts.
pub const MIN_DURATION: Duration = Duration::from_millis(1);

fn ensure_positive(key: &str, value: f64) -> anyhow::Result<()> {
    let duration = Duration::try_from_secs_f64(value).map_err(|_| {
        anyhow::anyhow!("{} must be a positive number of seconds, got {}", key, value)
    })?;
    anyhow::ensure!(
        duration >= MIN_DURATION,
        "{} must be at least {:?}, got {}",
        key,
        MIN_DURATION,
        value
    );
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
