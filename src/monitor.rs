// Orchestrator: wires pool, resolver and collectors from config, then publishes snapshots
// on every poll tick until shutdown.

use crate::collector::database::DatabaseCollector;
use crate::collector::process::ProcessCollector;
use crate::collector::service::ServiceCollector;
use crate::collector::system::SystemCollector;
use crate::collector::webserver::WebServerCollector;
use crate::collector::{Collector, CollectorRegistry, ManagedCollector};
use crate::config::AppConfig;
use crate::models::HostTarget;
use crate::platform::PlatformResolver;
use crate::pool::SessionPool;
use crate::render::{HostSnapshot, Snapshot};
use crate::transport::Connector;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// The built-in collectors, configured from their `[collectors.<name>]` sections.
pub fn builtin_collectors(config: &AppConfig) -> Vec<Arc<dyn Collector>> {
    let monitored = config
        .collector("process")
        .map(|c| c.monitored.clone())
        .unwrap_or_default();
    let services = config
        .collector("service")
        .map(|c| c.services.clone())
        .unwrap_or_default();
    vec![
        Arc::new(SystemCollector),
        Arc::new(ProcessCollector::new(monitored)),
        Arc::new(ServiceCollector::new(services)),
        Arc::new(WebServerCollector),
        Arc::new(DatabaseCollector),
    ]
}

pub struct Monitor {
    pool: Arc<SessionPool>,
    resolver: Arc<PlatformResolver>,
    registry: CollectorRegistry,
    targets: Vec<HostTarget>,
    hosts: Vec<String>,
    intervals: HashMap<String, Duration>,
    poll_interval: Duration,
}

impl Monitor {
    /// Builds everything from `config` without touching the network.
    pub fn build(config: &AppConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_collectors(config, connector, builtin_collectors(config))
    }

    pub fn with_collectors(
        config: &AppConfig,
        connector: Arc<dyn Connector>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Self {
        let pool = Arc::new(
            SessionPool::new(connector, config.retry_policy())
                .with_command_timeout(config.command_timeout()),
        );
        let resolver = Arc::new(PlatformResolver::new(pool.clone()));
        let poll_interval = config.poll_interval();

        let mut registry = CollectorRegistry::new();
        for collector in collectors {
            let name = collector.name().to_string();
            registry.register(Arc::new(ManagedCollector::new(
                collector,
                pool.clone(),
                resolver.clone(),
                poll_interval,
            )));
            if config.collector_enabled(&name) {
                registry.enable(&name);
            }
        }

        Self {
            pool,
            resolver,
            registry,
            targets: config.host_targets(),
            hosts: config.server_names(),
            intervals: config.collector_intervals(),
            poll_interval,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn resolver(&self) -> &Arc<PlatformResolver> {
        &self.resolver
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Registers every host concurrently. A host that cannot be reached stays
    /// registered and is retried by the next command against it.
    pub async fn connect_all(&self) {
        let adds = self.targets.iter().cloned().map(|target| {
            let pool = self.pool.clone();
            async move {
                let name = target.name.clone();
                if let Err(e) = pool.add_server(target).await {
                    warn!(host = %name, error = %e, operation = "add_server", "initial connection failed");
                }
            }
        });
        join_all(adds).await;
        info!(hosts = self.hosts.len(), "servers registered");
    }

    pub async fn start(&self) {
        self.registry.start_all(&self.hosts, &self.intervals).await;
    }

    /// Latest record of every enabled collector for every host.
    pub async fn snapshot(&self) -> Snapshot {
        let hosts = join_all(self.hosts.iter().map(|host| async move {
            let metrics = self.registry.get_all_metrics(host).await;
            HostSnapshot {
                host: host.clone(),
                status: self.pool.get_server_status(host),
                platform: self.resolver.cached(host),
                metrics,
            }
        }))
        .await;
        Snapshot {
            taken_at: Utc::now(),
            hosts,
        }
    }

    /// Stops every collection loop, then closes the pool.
    pub async fn shutdown(&self) {
        self.registry.stop_all().await;
        self.pool.close().await;
        info!("monitor stopped");
    }

    /// Connects, takes one snapshot and shuts down.
    pub async fn run_once(&self) -> Snapshot {
        self.connect_all().await;
        let snapshot = self.snapshot().await;
        self.shutdown().await;
        snapshot
    }
}

/// Snapshot sink and shutdown for the publishing loop.
pub struct MonitorDeps {
    pub monitor: Arc<Monitor>,
    pub tx: mpsc::Sender<Snapshot>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Starts collection and publishes a snapshot every poll interval. On shutdown (or when
/// the receiver goes away) collectors are stopped and the pool is closed before the
/// task ends.
pub fn spawn(deps: MonitorDeps) -> tokio::task::JoinHandle<()> {
    let MonitorDeps {
        monitor,
        tx,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        tokio::select! {
            _ = monitor.connect_all() => {}
            _ = &mut shutdown_rx => {
                info!("shutdown requested while connecting");
                monitor.shutdown().await;
                return;
            }
        }
        monitor.start().await;

        let mut tick = interval(monitor.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let snapshot = monitor.snapshot().await;
                    if tx.send(snapshot).await.is_err() {
                        debug!("snapshot receiver dropped");
                        break;
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("shutdown requested");
                    break;
                }
            }
        }
        monitor.shutdown().await;
    })
}
