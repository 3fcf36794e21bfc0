// Named set of collectors with an enabled subset; fans out per-host requests.

use super::ManagedCollector;
use crate::models::MetricRecord;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Default)]
pub struct CollectorRegistry {
    collectors: HashMap<String, Arc<ManagedCollector>>,
    enabled: HashSet<String>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `collector` under its name. A previous collector with that name is
    /// replaced and its refresh loops are cancelled.
    pub fn register(&mut self, collector: Arc<ManagedCollector>) {
        let name = collector.name().to_string();
        if let Some(replaced) = self.collectors.insert(name.clone(), collector.clone())
            && !Arc::ptr_eq(&replaced, &collector)
        {
            replaced.cancel_collection();
            warn!(collector = %name, "replaced existing collector");
        }
        info!(collector = %name, "registered collector");
    }

    /// Unknown names are ignored with a warning.
    pub fn enable(&mut self, name: &str) {
        if self.collectors.contains_key(name) {
            self.enabled.insert(name.to_string());
            info!(collector = name, "enabled collector");
        } else {
            warn!(collector = name, "collector not found");
        }
    }

    pub fn disable(&mut self, name: &str) {
        self.enabled.remove(name);
        info!(collector = name, "disabled collector");
    }

    pub fn get_collector(&self, name: &str) -> Option<Arc<ManagedCollector>> {
        self.collectors.get(name).cloned()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Enabled collectors in name order.
    pub fn enabled_collectors(&self) -> Vec<Arc<ManagedCollector>> {
        let mut names: Vec<&String> = self.enabled.iter().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.collectors.get(name).cloned())
            .collect()
    }

    /// Starts loops for every enabled collector; `intervals` overrides per-collector defaults.
    pub async fn start_all(&self, hosts: &[String], intervals: &HashMap<String, Duration>) {
        let starts = self.enabled_collectors().into_iter().map(|collector| {
            let interval = intervals
                .get(collector.name())
                .copied()
                .unwrap_or_else(|| collector.default_interval());
            async move { collector.start_collection(hosts, interval).await }
        });
        join_all(starts).await;
    }

    /// Stops every registered collector, enabled or not.
    pub async fn stop_all(&self) {
        join_all(self.collectors.values().map(|c| c.stop_collection())).await;
    }

    /// One record per enabled collector. Each collector runs in its own task, so a panic
    /// in one becomes an error record for that collector only.
    pub async fn get_all_metrics(&self, host: &str) -> BTreeMap<String, MetricRecord> {
        let tasks: Vec<(String, tokio::task::JoinHandle<MetricRecord>)> = self
            .enabled_collectors()
            .into_iter()
            .map(|collector| {
                let name = collector.name().to_string();
                let host = host.to_string();
                let handle =
                    tokio::spawn(async move { collector.get_metrics(&host, false).await });
                (name, handle)
            })
            .collect();

        let mut results = BTreeMap::new();
        for (name, handle) in tasks {
            let record = match handle.await {
                Ok(record) => record,
                Err(e) => {
                    error!(collector = %name, host, error = %e, "failed to get metrics");
                    MetricRecord::failure(host, &name, e.to_string())
                }
            };
            results.insert(name, record);
        }
        results
    }
}
