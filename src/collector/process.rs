// Process collector: `ps aux` rows grouped by monitored name patterns, with runtime
// details for node, python and docker groups.

use super::{CollectContext, Collector};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const DOCKER_TIMEOUT: Duration = Duration::from_secs(15);

pub const NODE_COMMANDS: [&str; 3] = [
    "pm2 list 2>/dev/null | tail -n +4 | head -n -1 || echo 'no_pm2'",
    "node --version 2>/dev/null || echo 'no_node'",
    "npm --version 2>/dev/null || echo 'no_npm'",
];

pub const PYTHON_COMMANDS: [&str; 3] = [
    "python3 --version 2>/dev/null || python --version 2>/dev/null || echo 'no_python'",
    "pip3 --version 2>/dev/null || pip --version 2>/dev/null || echo 'no_pip'",
    "pgrep -f 'venv/\\|virtualenv\\|conda' | wc -l",
];

pub const DOCKER_COMMANDS: [&str; 3] = [
    "docker --version 2>/dev/null || echo 'no_docker'",
    "docker ps --format 'table {{.Names}}\\t{{.Status}}\\t{{.Ports}}' 2>/dev/null || echo 'no_containers'",
    "docker system df 2>/dev/null || echo 'no_system_info'",
];

pub const DEFAULT_MONITORED: [&str; 8] = [
    "node", "python", "java", "docker", "pm2", "gunicorn", "uwsgi", "celery",
];

// USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
static PYTHON_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Python (\d+\.\d+\.\d+)").expect("valid regex"));
static PIP_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pip (\d+\.\d+\.\d+)").expect("valid regex"));
static DOCKER_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Docker version (\d+\.\d+\.\d+)").expect("valid regex"));
// TYPE TOTAL ACTIVE SIZE RECLAIMABLE
static DOCKER_DF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+\d+\s+([\d.]+\w+)").expect("valid regex"));

static PS_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\S+)\s+(\d+)\s+([\d.]+)\s+([\d.]+)\s+(\d+)\s+(\d+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(.+)$",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub user: String,
    pub pid: u32,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub vsz_kb: u64,
    pub rss_kb: u64,
    pub tty: String,
    pub stat: String,
    pub start: String,
    pub time: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessGroup {
    pub processes: Vec<ProcessInfo>,
    pub count: usize,
    pub total_cpu: f64,
    pub total_memory: f64,
    pub total_rss: u64,
    /// Runtime specific fields (versions, pm2 table, containers) for node, python and docker.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ProcessGroup {
    fn from_matches(processes: Vec<ProcessInfo>) -> Self {
        let total_cpu = processes.iter().map(|p| p.cpu_percent).sum::<f64>();
        let total_memory = processes.iter().map(|p| p.memory_percent).sum::<f64>();
        Self {
            count: processes.len(),
            total_cpu: (total_cpu * 100.0).round() / 100.0,
            total_memory: (total_memory * 100.0).round() / 100.0,
            total_rss: processes.iter().map(|p| p.rss_kb).sum(),
            processes,
            details: Map::new(),
        }
    }
}

pub struct ProcessCollector {
    monitored: Vec<String>,
}

impl ProcessCollector {
    /// An empty list falls back to [`DEFAULT_MONITORED`].
    pub fn new(monitored: Vec<String>) -> Self {
        let monitored = if monitored.is_empty() {
            DEFAULT_MONITORED.iter().map(|s| s.to_string()).collect()
        } else {
            monitored
        };
        Self { monitored }
    }

    pub fn monitored(&self) -> &[String] {
        &self.monitored
    }

    /// Groups parsed rows by pattern; patterns with no matching process are omitted.
    pub fn group(&self, processes: &[ProcessInfo]) -> BTreeMap<String, ProcessGroup> {
        self.monitored
            .iter()
            .filter_map(|pattern| {
                let matching: Vec<ProcessInfo> = processes
                    .iter()
                    .filter(|p| matches_pattern(&p.command, pattern))
                    .cloned()
                    .collect();
                (!matching.is_empty())
                    .then(|| (pattern.clone(), ProcessGroup::from_matches(matching)))
            })
            .collect()
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Process monitoring (Node.js, Python, Java, etc.)"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value> {
        let output = ctx
            .pool
            .execute(host, ctx.commands.process_list, Some(COMMAND_TIMEOUT))
            .await?;
        let processes = parse_process_list(&output);
        debug!(host, rows = processes.len(), "parsed process list");

        let mut groups = self.group(&processes);
        for runtime in Runtime::ALL {
            let Some(group) = groups.get_mut(runtime.group()) else {
                continue;
            };
            let details = match ctx
                .pool
                .execute_batch(host, runtime.commands(), Some(runtime.timeout()))
                .await
            {
                Ok(outputs) => runtime.details(&outputs),
                Err(e) => {
                    error!(host, error = %e, operation = runtime.group(), "failed to collect runtime details");
                    let mut details = Map::new();
                    details.insert(format!("{}_error", runtime.group()), e.to_string().into());
                    details
                }
            };
            group.details.extend(details);
        }
        Ok(serde_json::to_value(groups)?)
    }
}

/// Process groups that get an extra batch of runtime queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Node,
    Python,
    Docker,
}

impl Runtime {
    pub const ALL: [Runtime; 3] = [Runtime::Node, Runtime::Python, Runtime::Docker];

    pub fn group(&self) -> &'static str {
        match self {
            Runtime::Node => "node",
            Runtime::Python => "python",
            Runtime::Docker => "docker",
        }
    }

    fn commands(&self) -> &'static [&'static str] {
        match self {
            Runtime::Node => &NODE_COMMANDS,
            Runtime::Python => &PYTHON_COMMANDS,
            Runtime::Docker => &DOCKER_COMMANDS,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Runtime::Docker => DOCKER_TIMEOUT,
            _ => COMMAND_TIMEOUT,
        }
    }

    /// Outputs in the runtime's command order.
    pub fn details(&self, outputs: &[String]) -> Map<String, Value> {
        match self {
            Runtime::Node => node_details(outputs),
            Runtime::Python => python_details(outputs),
            Runtime::Docker => docker_details(outputs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pm2Process {
    pub name: String,
    pub mode: String,
    pub pid: String,
    pub status: String,
    pub restart: String,
    pub uptime: String,
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub name: String,
    pub status: String,
    pub ports: String,
}

/// `Some(trimmed)` unless the command printed its fallback marker or nothing.
fn reported<'a>(output: &'a str, missing: &str) -> Option<&'a str> {
    let output = output.trim();
    (!output.is_empty() && output != missing).then_some(output)
}

fn node_details(outputs: &[String]) -> Map<String, Value> {
    let mut details = Map::new();
    if let Some(list) = reported(&outputs[0], "no_pm2") {
        details.insert("pm2_processes".into(), serde_json::json!(parse_pm2_list(list)));
    }
    if let Some(version) = reported(&outputs[1], "no_node") {
        details.insert("node_version".into(), version.into());
    }
    if let Some(version) = reported(&outputs[2], "no_npm") {
        details.insert("npm_version".into(), version.into());
    }
    details
}

fn python_details(outputs: &[String]) -> Map<String, Value> {
    let mut details = Map::new();
    if let Some(caps) =
        reported(&outputs[0], "no_python").and_then(|o| PYTHON_VERSION_RE.captures(o))
    {
        details.insert("python_version".into(), Value::from(&caps[1]));
    }
    if let Some(caps) =
        reported(&outputs[1], "no_pip").and_then(|o| PIP_VERSION_RE.captures(o))
    {
        details.insert("pip_version".into(), Value::from(&caps[1]));
    }
    if let Ok(venvs) = outputs[2].trim().parse::<u64>() {
        details.insert("virtual_env_processes".into(), venvs.into());
    }
    details
}

fn docker_details(outputs: &[String]) -> Map<String, Value> {
    let mut details = Map::new();
    if let Some(caps) =
        reported(&outputs[0], "no_docker").and_then(|o| DOCKER_VERSION_RE.captures(o))
    {
        details.insert("docker_version".into(), Value::from(&caps[1]));
    }
    if let Some(table) = reported(&outputs[1], "no_containers") {
        let containers = parse_docker_containers(table);
        details.insert("container_count".into(), containers.len().into());
        details.insert("containers".into(), serde_json::json!(containers));
    }
    if let Some(df) = reported(&outputs[2], "no_system_info") {
        details.extend(parse_docker_system_df(df));
    }
    details
}

/// Rows of the `pm2 list` box table; border lines carry no `│` and are skipped.
pub fn parse_pm2_list(output: &str) -> Vec<Pm2Process> {
    output
        .lines()
        .filter(|line| line.contains('│'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('│').map(str::trim).collect();
            if parts.len() < 6 {
                return None;
            }
            let field = |i: usize| parts.get(i).copied().unwrap_or_default().to_string();
            Some(Pm2Process {
                name: field(1),
                mode: field(2),
                pid: field(3),
                status: field(4),
                restart: field(5),
                uptime: field(6),
                cpu: field(7),
                memory: field(8),
            })
        })
        .collect()
}

/// Tab separated `docker ps --format 'table ...'` output, header first.
pub fn parse_docker_containers(output: &str) -> Vec<Container> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split('\t').map(str::trim);
            let (name, status, ports) = (fields.next()?, fields.next()?, fields.next()?);
            (!name.is_empty()).then(|| Container {
                name: name.to_string(),
                status: status.to_string(),
                ports: ports.to_string(),
            })
        })
        .collect()
}

pub fn parse_docker_system_df(output: &str) -> Map<String, Value> {
    let mut info = Map::new();
    for line in output.lines() {
        let (count_key, size_key) = if line.contains("Images") {
            ("image_count", "images_size")
        } else if line.contains("Containers") {
            ("total_containers", "containers_size")
        } else if line.contains("Local Volumes") {
            ("volume_count", "volumes_size")
        } else {
            continue;
        };
        let Some(caps) = DOCKER_DF_RE.captures(line) else {
            continue;
        };
        if let Ok(count) = caps[1].parse::<u64>() {
            info.insert(count_key.into(), count.into());
            info.insert(size_key.into(), Value::from(&caps[2]));
        }
    }
    info
}

/// Parses `ps aux` rows. Header and malformed rows are skipped.
pub fn parse_process_list(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let caps = PS_ROW_RE.captures(line)?;
            Some(ProcessInfo {
                user: caps[1].to_string(),
                pid: caps[2].parse().ok()?,
                cpu_percent: caps[3].parse().ok()?,
                memory_percent: caps[4].parse().ok()?,
                vsz_kb: caps[5].parse().ok()?,
                rss_kb: caps[6].parse().ok()?,
                tty: caps[7].to_string(),
                stat: caps[8].to_string(),
                start: caps[9].to_string(),
                time: caps[10].to_string(),
                command: caps[11].trim().to_string(),
            })
        })
        .collect()
}

/// Case-insensitive substring match. Our own `grep` never counts; kernel threads
/// (`[kthreadd]`) are excluded for language runtimes.
pub fn matches_pattern(command: &str, pattern: &str) -> bool {
    let command = command.to_lowercase();
    if command.starts_with("grep") {
        return false;
    }
    match pattern {
        "node" | "python" | "java" => command.contains(pattern) && !command.contains('['),
        "docker" => command.contains("docker") || command.contains("containerd"),
        _ => command.contains(&pattern.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS: &str = "\
root         1  0.0  0.1 169000 11000 ?        Ss   Oct01   0:05 /sbin/init
root         2  0.0  0.0      0     0 ?        S    Oct01   0:00 [kthreadd]
app        812  3.5  2.0 900000 40000 ?        Sl   Oct01  10:00 node /srv/app/server.js
app        813  1.5  1.0 800000 20000 ?        Sl   Oct01   5:00 node /srv/app/worker.js
app        900  0.2  0.5 100000 10000 ?        S    Oct01   0:30 /usr/bin/python3 -m gunicorn app:app
root      1000  0.0  0.0   6000   900 pts/0    S+   10:00   0:00 grep node
root      1100  0.4  0.8 500000 16000 ?        Ssl  Oct01   1:00 /usr/bin/containerd
";

    #[test]
    fn parses_rows_with_spaces_in_command() {
        let rows = parse_process_list(PS);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[2].pid, 812);
        assert_eq!(rows[2].command, "node /srv/app/server.js");
        assert_eq!(rows[2].rss_kb, 40000);
    }

    #[test]
    fn header_and_garbage_rows_are_skipped() {
        let rows = parse_process_list("USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND\nnonsense\n");
        assert!(rows.is_empty());
    }

    #[test]
    fn groups_by_pattern_and_excludes_grep() {
        let collector = ProcessCollector::default();
        let groups = collector.group(&parse_process_list(PS));

        let node = &groups["node"];
        assert_eq!(node.count, 2);
        assert!((node.total_cpu - 5.0).abs() < f64::EPSILON);
        assert_eq!(node.total_rss, 60000);

        assert_eq!(groups["python"].count, 1);
        assert_eq!(groups["gunicorn"].count, 1);
        assert_eq!(groups["docker"].count, 1);
        assert!(!groups.contains_key("java"));
    }

    #[test]
    fn kernel_threads_do_not_match_runtimes() {
        assert!(!matches_pattern("[python-worker]", "python"));
        assert!(matches_pattern("[celery beat]", "celery"));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let collector = ProcessCollector::new(vec!["init".into()]);
        assert_eq!(collector.monitored(), ["init".to_string()]);
        let groups = collector.group(&parse_process_list(PS));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["init"].count, 1);
    }

    #[test]
    fn pm2_rows_become_processes() {
        let list = "\
│ api      │ fork    │ 4021 │ online │ 3  │ 2D  │ 0.5% │ 61.2mb │
│ worker   │ cluster │ 4022 │ errored │ 15 │ 0s │ 0% │ 0b │
└──────────┴─────────┴──────┘";
        let processes = parse_pm2_list(list);
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].name, "api");
        assert_eq!(processes[0].pid, "4021");
        assert_eq!(processes[0].memory, "61.2mb");
        assert_eq!(processes[1].status, "errored");
        assert_eq!(processes[1].restart, "15");
    }

    #[test]
    fn node_details_skip_missing_tools() {
        let details = Runtime::Node.details(&[
            "no_pm2".to_string(),
            "v20.11.1\n".to_string(),
            "no_npm".to_string(),
        ]);
        assert_eq!(details["node_version"], "v20.11.1");
        assert!(!details.contains_key("pm2_processes"));
        assert!(!details.contains_key("npm_version"));
    }

    #[test]
    fn python_details_extract_versions() {
        let details = Runtime::Python.details(&[
            "Python 3.11.6".to_string(),
            "pip 23.3.1 from /usr/lib/python3/dist-packages/pip (python 3.11)".to_string(),
            "2".to_string(),
        ]);
        assert_eq!(details["python_version"], "3.11.6");
        assert_eq!(details["pip_version"], "23.3.1");
        assert_eq!(details["virtual_env_processes"], 2);
    }

    #[test]
    fn docker_details_list_containers_and_disk_usage() {
        let details = Runtime::Docker.details(&[
            "Docker version 24.0.7, build afdd53b".to_string(),
            "NAMES\tSTATUS\tPORTS\nweb\tUp 2 hours\t0.0.0.0:80->80/tcp\ndb\tUp 3 days\t5432/tcp"
                .to_string(),
            "TYPE            TOTAL     ACTIVE    SIZE      RECLAIMABLE\n\
             Images          5         2         1.2GB     800MB (66%)\n\
             Containers      3         2         12kB      0B (0%)\n\
             Local Volumes   4         1         300MB     120MB (40%)\n\
             Build Cache     0         0         0B        0B"
                .to_string(),
        ]);
        assert_eq!(details["docker_version"], "24.0.7");
        assert_eq!(details["container_count"], 2);
        assert_eq!(details["containers"][0]["name"], "web");
        assert_eq!(details["containers"][1]["ports"], "5432/tcp");
        assert_eq!(details["image_count"], 5);
        assert_eq!(details["images_size"], "1.2GB");
        assert_eq!(details["total_containers"], 3);
        assert_eq!(details["volume_count"], 4);
        assert_eq!(details["volumes_size"], "300MB");
    }

    #[test]
    fn runtime_details_are_flattened_into_the_group() {
        let collector = ProcessCollector::default();
        let mut groups = collector.group(&parse_process_list(PS));
        let node = groups.get_mut("node").unwrap();
        node.details.insert("node_version".into(), "v20.11.1".into());

        let value = serde_json::to_value(&groups).unwrap();
        assert_eq!(value["node"]["node_version"], "v20.11.1");
        assert_eq!(value["node"]["count"], 2);
        assert!(value["python"].get("python_version").is_none());
    }
}
