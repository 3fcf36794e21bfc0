//! Collector framework.
//!
//! A [`Collector`] implements exactly one thing: given a host and its resolved platform,
//! run whatever remote commands it needs and return a JSON payload. Caching, periodic
//! refresh and error capture are supplied by [`ManagedCollector`]; fan-out across many
//! collectors with failure isolation is [`CollectorRegistry`].

mod managed;
mod registry;

pub mod database;
pub mod process;
pub mod service;
pub mod system;
pub mod webserver;

pub use managed::ManagedCollector;
pub use registry::CollectorRegistry;

use crate::platform::{CommandDialect, Platform};
use crate::pool::SessionPool;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Everything a collector may use during one `collect` call.
pub struct CollectContext<'a> {
    pub pool: &'a SessionPool,
    pub platform: Platform,
    pub commands: &'static CommandDialect,
}

/// One kind of remote observation.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Unique registry key, e.g. `"system"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Refresh interval used when the configuration does not set one.
    fn default_interval(&self) -> Duration;

    /// Gathers a payload for `host`.
    ///
    /// # Errors
    ///
    /// Any error is captured by the framework and stored as an error record.
    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value>;
}
