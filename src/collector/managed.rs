// Caching and periodic refresh around one Collector.

use super::{CollectContext, Collector};
use crate::models::MetricRecord;
use crate::platform::PlatformResolver;
use crate::pool::SessionPool;
use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A collector plus its per-host cache and its per-host refresh loops.
///
/// Each host's cache entry is written only by this collector, and only one record per
/// host is kept: a new record (success or error) always replaces the previous one.
pub struct ManagedCollector {
    collector: Arc<dyn Collector>,
    pool: Arc<SessionPool>,
    resolver: Arc<PlatformResolver>,
    cache_duration: Duration,
    cache: RwLock<HashMap<String, MetricRecord>>,
    loops: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl ManagedCollector {
    pub fn new(
        collector: Arc<dyn Collector>,
        pool: Arc<SessionPool>,
        resolver: Arc<PlatformResolver>,
        cache_duration: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            collector,
            pool,
            resolver,
            cache_duration,
            cache: RwLock::new(HashMap::new()),
            loops: tokio::sync::Mutex::new(HashMap::new()),
            stop_tx,
        }
    }

    pub fn name(&self) -> &str {
        self.collector.name()
    }

    pub fn description(&self) -> &str {
        self.collector.description()
    }

    pub fn default_interval(&self) -> Duration {
        self.collector.default_interval()
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Cached record when younger than the cache window, otherwise a fresh collection.
    /// Never fails: collection errors come back as error records.
    pub async fn get_metrics(&self, host: &str, force_refresh: bool) -> MetricRecord {
        if !force_refresh
            && let Some(cached) = self.cached(host)
            && !cached.is_stale(self.cache_duration)
        {
            debug!(collector = self.name(), host, "using cached metrics");
            return cached;
        }

        let record = match self.collect_fresh(host).await {
            Ok(payload) => {
                debug!(collector = self.name(), host, "collected fresh metrics");
                MetricRecord::success(host, self.name(), payload)
            }
            Err(message) => {
                error!(collector = self.name(), host, error = %message, "failed to collect metrics");
                MetricRecord::failure(host, self.name(), message)
            }
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let record = record.carrying_success_from(cache.get(host));
        cache.insert(host.to_string(), record.clone());
        record
    }

    async fn collect_fresh(&self, host: &str) -> Result<Value, String> {
        let platform = self.resolver.detect_platform(host).await;
        let ctx = CollectContext {
            pool: &self.pool,
            platform,
            commands: self.resolver.get_commands(platform),
        };
        match AssertUnwindSafe(self.collector.collect(host, &ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(format!("collector panicked: {}", panic_message(panic.as_ref()))),
        }
    }

    /// Starts one refresh loop per host that does not already have a running one.
    pub async fn start_collection(self: &Arc<Self>, hosts: &[String], interval: Duration) {
        let mut loops = self.loops.lock().await;
        for host in hosts {
            if loops.get(host).is_some_and(|handle| !handle.is_finished()) {
                continue;
            }
            let stop_rx = self.stop_tx.subscribe();
            let handle = tokio::spawn(Arc::clone(self).refresh_loop(host.clone(), interval, stop_rx));
            loops.insert(host.clone(), handle);
            info!(collector = self.name(), host = %host, "started collection");
        }
    }

    /// Signals, cancels and awaits every loop. Safe to call repeatedly; collection can be
    /// started again afterwards.
    pub async fn stop_collection(&self) {
        self.stop_tx.send_replace(true);
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut loops = self.loops.lock().await;
            loops.drain().collect()
        };
        for (_, handle) in &handles {
            handle.abort();
        }
        for (host, handle) in handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!(collector = self.name(), host = %host, error = %e, "collection task ended abnormally");
            }
        }
        self.stop_tx.send_replace(false);
        info!(collector = self.name(), "stopped all collection tasks");
    }

    /// Signals every loop to stop and aborts them without waiting. For a collector that
    /// is being discarded; use `stop_collection` when it may be started again.
    pub fn cancel_collection(&self) {
        self.stop_tx.send_replace(true);
        if let Ok(mut loops) = self.loops.try_lock() {
            for (_, handle) in loops.drain() {
                handle.abort();
            }
        }
    }

    /// Hosts with a live refresh loop, sorted.
    pub async fn active_hosts(&self) -> Vec<String> {
        let loops = self.loops.lock().await;
        let mut hosts: Vec<String> = loops
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(host, _)| host.clone())
            .collect();
        hosts.sort();
        hosts
    }

    async fn refresh_loop(
        self: Arc<Self>,
        host: String,
        interval: Duration,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        info!(collector = self.name(), host = %host, interval = ?interval, "collection loop running");
        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }
            self.get_metrics(&host, true).await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_rx.changed() => break,
            }
        }
        info!(collector = self.name(), host = %host, "collection loop stopped");
    }

    /// Snapshot of the cache, optionally limited to `hosts`. No I/O.
    pub fn get_cached_metrics(&self, hosts: Option<&[String]>) -> HashMap<String, MetricRecord> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        match hosts {
            None => cache.clone(),
            Some(hosts) => cache
                .iter()
                .filter(|(host, _)| hosts.contains(host))
                .map(|(host, record)| (host.clone(), record.clone()))
                .collect(),
        }
    }

    /// Evicts one host's record, or everything when `host` is `None`.
    pub fn clear_cache(&self, host: Option<&str>) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        match host {
            Some(host) => {
                cache.remove(host);
            }
            None => cache.clear(),
        }
    }

    fn cached(&self, host: &str) -> Option<MetricRecord> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
