// Service collector: process count and service state for a configured list.

use super::{CollectContext, Collector};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub process_count: u32,
    pub status: String,
    pub running: bool,
}

impl ServiceState {
    /// Running when the service manager says `active` or any matching process exists.
    pub fn from_outputs(name: &str, count_output: &str, status_output: &str) -> Self {
        let process_count = count_output.trim().parse().unwrap_or(0);
        let status = status_output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("unknown")
            .to_string();
        Self {
            name: name.to_string(),
            running: status == "active" || process_count > 0,
            process_count,
            status,
        }
    }
}

pub struct ServiceCollector {
    services: Vec<String>,
}

impl ServiceCollector {
    pub fn new(services: Vec<String>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }
}

#[async_trait]
impl Collector for ServiceCollector {
    fn name(&self) -> &str {
        "service"
    }

    fn description(&self) -> &str {
        "Generic service monitoring"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value> {
        if self.services.is_empty() {
            return Ok(json!({}));
        }

        let commands: Vec<String> = self
            .services
            .iter()
            .flat_map(|service| {
                [
                    ctx.commands.process_count(service),
                    ctx.commands.service_status(service),
                ]
            })
            .collect();
        let results = ctx
            .pool
            .execute_batch(host, &commands, Some(COMMAND_TIMEOUT))
            .await?;

        let services: BTreeMap<&str, ServiceState> = self
            .services
            .iter()
            .zip(results.chunks(2))
            .map(|(service, pair)| {
                let state = ServiceState::from_outputs(service, &pair[0], &pair[1]);
                (service.as_str(), state)
            })
            .collect();
        Ok(json!({ "services": services }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_status_means_running() {
        let state = ServiceState::from_outputs("nginx", "0\n", "active\n");
        assert!(state.running);
        assert_eq!(state.process_count, 0);
        assert_eq!(state.status, "active");
    }

    #[test]
    fn processes_count_as_running_without_a_service_manager() {
        let state = ServiceState::from_outputs("redis", " 2 ", "unknown");
        assert!(state.running);
        assert_eq!(state.process_count, 2);
    }

    #[test]
    fn first_status_line_wins() {
        let state = ServiceState::from_outputs("sshd", "0", "inactive\nunknown\n");
        assert_eq!(state.status, "inactive");
        assert!(!state.running);
    }

    #[test]
    fn empty_outputs_are_unknown_and_stopped() {
        let state = ServiceState::from_outputs("x", "", "");
        assert_eq!(state.status, "unknown");
        assert!(!state.running);
    }
}
