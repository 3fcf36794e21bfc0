// Webserver collector: nginx and apache presence, status pages and config checks.

use super::{CollectContext, Collector};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::error;

const DETECT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_UNAVAILABLE: &str = "status_unavailable";
const NO_PORTS: &str = "no_ports";

pub const APACHE_DETECT: &str = "pgrep -f 'apache2|httpd' | wc -l";
pub const NGINX_DETECT: &str = "pgrep nginx | wc -l";

pub const APACHE_COMMANDS: [&str; 5] = [
    "curl -s http://localhost/server-status?auto 2>/dev/null || echo 'status_unavailable'",
    "ps aux | grep -E '[a]pache2|[h]ttpd' | wc -l",
    "systemctl is-active apache2 2>/dev/null || systemctl is-active httpd 2>/dev/null || echo 'unknown'",
    "netstat -tlnp 2>/dev/null | grep -E ':80 |:443 ' | grep -E 'apache2|httpd' || echo 'no_ports'",
    "apache2ctl configtest 2>&1 || httpd -t 2>&1 || echo 'config_check_failed'",
];

pub const NGINX_COMMANDS: [&str; 6] = [
    "curl -s http://localhost/nginx_status 2>/dev/null || echo 'status_unavailable'",
    "ps aux | grep '[n]ginx' | wc -l",
    "systemctl is-active nginx 2>/dev/null || echo 'unknown'",
    "netstat -tlnp 2>/dev/null | grep nginx || echo 'no_ports'",
    "nginx -t 2>&1 || echo 'config_check_failed'",
    "ps aux | grep '[n]ginx: worker' | wc -l",
];

static APACHE_PORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":(\d+)\s+.*?(\d+)/(apache2|httpd)").expect("valid regex")
});
static NGINX_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)\s+.*?(\d+)/(nginx)").expect("valid regex"));
static NGINX_ACTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Active connections:\s*(\d+)").expect("valid regex"));
static NGINX_TOTALS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s+(\d+)\s+(\d+)\s*$").expect("valid regex"));
static NGINX_RWW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Reading:\s*(\d+)\s+Writing:\s*(\d+)\s+Waiting:\s*(\d+)").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListeningPort {
    pub port: u16,
    pub pid: u32,
    pub process: String,
}

/// Apache `server-status?auto` fields; absent lines stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApacheStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_accesses: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_kbytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_load: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_req: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_workers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_workers: Option<u64>,
}

/// Nginx `stub_status` counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NginxStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writing: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebServerReport<S> {
    pub service: &'static str,
    pub status: String,
    pub process_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<u32>,
    pub ports: Vec<ListeningPort>,
    pub config_valid: bool,
    #[serde(flatten)]
    pub stats: Option<S>,
}

pub struct WebServerCollector;

#[async_trait]
impl Collector for WebServerCollector {
    fn name(&self) -> &str {
        "webserver"
    }

    fn description(&self) -> &str {
        "Webserver metrics (Apache, Nginx)"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Servers that are not running are left out of the payload; a failure while
    /// inspecting one server is reported under that server's key only.
    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value> {
        let detected = ctx
            .pool
            .execute_batch(host, &[APACHE_DETECT, NGINX_DETECT], Some(DETECT_TIMEOUT))
            .await?;
        let apache_running = count(&detected[0]) > 0;
        let nginx_running = count(&detected[1]) > 0;

        let mut results = Map::new();
        if apache_running {
            let report = match ctx
                .pool
                .execute_batch(host, &APACHE_COMMANDS, Some(COMMAND_TIMEOUT))
                .await
            {
                Ok(outputs) => serde_json::to_value(apache_report(&outputs))?,
                Err(e) => {
                    error!(host, error = %e, operation = "apache", "failed to collect webserver metrics");
                    server_error("apache", &e)
                }
            };
            results.insert("apache".into(), report);
        }
        if nginx_running {
            let report = match ctx
                .pool
                .execute_batch(host, &NGINX_COMMANDS, Some(COMMAND_TIMEOUT))
                .await
            {
                Ok(outputs) => serde_json::to_value(nginx_report(&outputs))?,
                Err(e) => {
                    error!(host, error = %e, operation = "nginx", "failed to collect webserver metrics");
                    server_error("nginx", &e)
                }
            };
            results.insert("nginx".into(), report);
        }
        Ok(Value::Object(results))
    }
}

pub(super) fn server_error(service: &str, e: &dyn std::fmt::Display) -> Value {
    json!({ "service": service, "status": "error", "error": e.to_string() })
}

pub(super) fn count(output: &str) -> u32 {
    output.trim().parse().unwrap_or(0)
}

/// Outputs in [`APACHE_COMMANDS`] order.
pub fn apache_report(outputs: &[String]) -> WebServerReport<ApacheStatus> {
    WebServerReport {
        service: "apache",
        status: first_line(&outputs[2]),
        process_count: count(&outputs[1]),
        worker_count: None,
        ports: parse_ports(&outputs[3], &APACHE_PORT_RE),
        config_valid: outputs[4].contains("Syntax OK"),
        stats: (outputs[0].trim() != STATUS_UNAVAILABLE).then(|| parse_apache_status(&outputs[0])),
    }
}

/// Outputs in [`NGINX_COMMANDS`] order.
pub fn nginx_report(outputs: &[String]) -> WebServerReport<NginxStatus> {
    WebServerReport {
        service: "nginx",
        status: first_line(&outputs[2]),
        process_count: count(&outputs[1]),
        worker_count: Some(count(&outputs[5])),
        ports: parse_ports(&outputs[3], &NGINX_PORT_RE),
        config_valid: outputs[4].to_lowercase().contains("syntax is ok"),
        stats: (outputs[0].trim() != STATUS_UNAVAILABLE).then(|| parse_nginx_status(&outputs[0])),
    }
}

pub(super) fn first_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

pub(super) fn parse_ports(output: &str, re: &Regex) -> Vec<ListeningPort> {
    if output.trim() == NO_PORTS {
        return Vec::new();
    }
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(ListeningPort {
                port: caps[1].parse().ok()?,
                pid: caps[2].parse().ok()?,
                process: caps[3].to_string(),
            })
        })
        .collect()
}

fn field<T: std::str::FromStr>(output: &str, key: &str) -> Option<T> {
    output.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name.trim() == key).then(|| value.trim().parse().ok())?
    })
}

pub fn parse_apache_status(output: &str) -> ApacheStatus {
    ApacheStatus {
        total_accesses: field(output, "Total Accesses"),
        total_kbytes: field(output, "Total kBytes"),
        cpu_load: field(output, "CPULoad"),
        uptime: field(output, "Uptime"),
        requests_per_sec: field(output, "ReqPerSec"),
        bytes_per_sec: field(output, "BytesPerSec"),
        bytes_per_req: field(output, "BytesPerReq"),
        busy_workers: field(output, "BusyWorkers"),
        idle_workers: field(output, "IdleWorkers"),
    }
}

pub fn parse_nginx_status(output: &str) -> NginxStatus {
    let mut status = NginxStatus {
        active_connections: NGINX_ACTIVE_RE
            .captures(output)
            .and_then(|c| c[1].parse().ok()),
        ..Default::default()
    };
    if let Some(caps) = NGINX_TOTALS_RE.captures(output) {
        status.accepts = caps[1].parse().ok();
        status.handled = caps[2].parse().ok();
        status.requests = caps[3].parse().ok();
    }
    if let Some(caps) = NGINX_RWW_RE.captures(output) {
        status.reading = caps[1].parse().ok();
        status.writing = caps[2].parse().ok();
        status.waiting = caps[3].parse().ok();
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUB_STATUS: &str = "Active connections: 291 \n\
server accepts handled requests\n \
16630948 16630948 31070465 \n\
Reading: 6 Writing: 179 Waiting: 106 \n";

    #[test]
    fn nginx_stub_status() {
        let status = parse_nginx_status(STUB_STATUS);
        assert_eq!(status.active_connections, Some(291));
        assert_eq!(status.accepts, Some(16630948));
        assert_eq!(status.requests, Some(31070465));
        assert_eq!(status.writing, Some(179));
        assert_eq!(status.waiting, Some(106));
    }

    #[test]
    fn apache_auto_status() {
        let out = "Total Accesses: 1200\nTotal kBytes: 5400\nCPULoad: .0123\nUptime: 3600\n\
                   ReqPerSec: .333\nBusyWorkers: 3\nIdleWorkers: 47\nScoreboard: __W__\n";
        let status = parse_apache_status(out);
        assert_eq!(status.total_accesses, Some(1200));
        assert_eq!(status.uptime, Some(3600));
        assert_eq!(status.busy_workers, Some(3));
        assert_eq!(status.idle_workers, Some(47));
        assert!((status.requests_per_sec.unwrap() - 0.333).abs() < 1e-9);
        assert_eq!(status.bytes_per_sec, None);
    }

    #[test]
    fn nginx_report_from_batch_outputs() {
        let outputs: Vec<String> = [
            STUB_STATUS,
            "5",
            "active",
            "tcp 0 0 0.0.0.0:80 0.0.0.0:* LISTEN 1234/nginx: master",
            "nginx: configuration file /etc/nginx/nginx.conf syntax is ok",
            "4",
        ]
        .map(String::from)
        .to_vec();
        let report = nginx_report(&outputs);
        assert_eq!(report.status, "active");
        assert_eq!(report.process_count, 5);
        assert_eq!(report.worker_count, Some(4));
        assert!(report.config_valid);
        assert_eq!(
            report.ports,
            vec![ListeningPort { port: 80, pid: 1234, process: "nginx".into() }]
        );

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["active_connections"], 291);
        assert_eq!(value["service"], "nginx");
    }

    #[test]
    fn apache_report_without_status_page() {
        let outputs: Vec<String> = [
            "status_unavailable",
            "3",
            "inactive\nunknown",
            "no_ports",
            "config_check_failed",
        ]
        .map(String::from)
        .to_vec();
        let report = apache_report(&outputs);
        assert_eq!(report.status, "inactive");
        assert!(report.ports.is_empty());
        assert!(!report.config_valid);
        assert!(report.stats.is_none());
        assert_eq!(report.worker_count, None);
    }
}
