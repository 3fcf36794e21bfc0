// Database collector: MySQL, PostgreSQL and Redis presence, reachability and basic stats.

use super::webserver::{ListeningPort, count, first_line, parse_ports, server_error};
use super::{CollectContext, Collector};
use crate::error::PoolError;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, warn};

const DETECT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
const STATS_TIMEOUT: Duration = Duration::from_secs(10);

pub const DATABASE_DETECT: [&str; 3] = [
    "pgrep -f 'mysqld' | wc -l",
    "pgrep -f 'postgres' | wc -l",
    "pgrep -f 'redis-server' | wc -l",
];

pub const MYSQL_COMMANDS: [&str; 5] = [
    "ps aux | grep '[m]ysqld' | wc -l",
    "systemctl is-active mysql 2>/dev/null || systemctl is-active mysqld 2>/dev/null || echo 'unknown'",
    "netstat -tlnp 2>/dev/null | grep mysqld || echo 'no_ports'",
    "mysql -e 'SELECT 1' 2>/dev/null && echo 'accessible' || echo 'not_accessible'",
    "mysql -e 'SELECT VERSION()' 2>/dev/null || echo 'version_unavailable'",
];

pub const MYSQL_STATS_COMMANDS: [&str; 5] = [
    "mysql -e 'SHOW GLOBAL STATUS LIKE \"Connections\"' 2>/dev/null",
    "mysql -e 'SHOW GLOBAL STATUS LIKE \"Threads_connected\"' 2>/dev/null",
    "mysql -e 'SHOW GLOBAL STATUS LIKE \"Uptime\"' 2>/dev/null",
    "mysql -e 'SHOW GLOBAL STATUS LIKE \"Questions\"' 2>/dev/null",
    "mysql -e 'SHOW DATABASES' 2>/dev/null | wc -l",
];

pub const POSTGRES_COMMANDS: [&str; 5] = [
    "ps aux | grep '[p]ostgres' | wc -l",
    "systemctl is-active postgresql 2>/dev/null || echo 'unknown'",
    "netstat -tlnp 2>/dev/null | grep postgres || echo 'no_ports'",
    "sudo -u postgres psql -c 'SELECT 1' 2>/dev/null && echo 'accessible' || echo 'not_accessible'",
    "sudo -u postgres psql -c 'SELECT version()' 2>/dev/null || echo 'version_unavailable'",
];

pub const POSTGRES_STATS_COMMANDS: [&str; 3] = [
    "sudo -u postgres psql -c 'SELECT count(*) FROM pg_stat_activity' 2>/dev/null",
    "sudo -u postgres psql -c 'SELECT count(*) FROM pg_database WHERE datistemplate = false' 2>/dev/null",
    "sudo -u postgres psql -c 'SELECT extract(epoch from now() - pg_postmaster_start_time())' 2>/dev/null",
];

pub const REDIS_COMMANDS: [&str; 5] = [
    "ps aux | grep '[r]edis-server' | wc -l",
    "systemctl is-active redis 2>/dev/null || systemctl is-active redis-server 2>/dev/null || echo 'unknown'",
    "netstat -tlnp 2>/dev/null | grep redis || echo 'no_ports'",
    "redis-cli ping 2>/dev/null || echo 'not_accessible'",
    "redis-cli info server 2>/dev/null || echo 'info_unavailable'",
];

/// Info fields kept as text even when they look numeric.
const REDIS_TEXT_FIELDS: [&str; 4] = ["redis_version", "os", "arch_bits", "multiplexing_api"];

static MYSQL_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)\s+.*?(\d+)/(mysqld)").expect("valid regex"));
static POSTGRES_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)\s+.*?(\d+)/(postgres)").expect("valid regex"));
static REDIS_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+)\s+.*?(\d+)/(redis-server|redis)").expect("valid regex"));
static MYSQL_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.\d+)").expect("valid regex"));
static POSTGRES_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PostgreSQL (\d+\.\d+)").expect("valid regex"));
static PSQL_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s*$").expect("valid regex"));
static PSQL_FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+\.?\d*)\s*$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    MySql,
    Postgres,
    Redis,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::MySql, Engine::Postgres, Engine::Redis];

    /// Payload key and `service` field.
    pub fn key(&self) -> &'static str {
        match self {
            Engine::MySql => "mysql",
            Engine::Postgres => "postgresql",
            Engine::Redis => "redis",
        }
    }

    fn commands(&self) -> &'static [&'static str] {
        match self {
            Engine::MySql => &MYSQL_COMMANDS,
            Engine::Postgres => &POSTGRES_COMMANDS,
            Engine::Redis => &REDIS_COMMANDS,
        }
    }

    /// Follow-up queries run only when the server accepted a connection.
    fn stats_commands(&self) -> Option<&'static [&'static str]> {
        match self {
            Engine::MySql => Some(&MYSQL_STATS_COMMANDS),
            Engine::Postgres => Some(&POSTGRES_STATS_COMMANDS),
            Engine::Redis => None,
        }
    }

    fn port_re(&self) -> &'static Regex {
        match self {
            Engine::MySql => &MYSQL_PORT_RE,
            Engine::Postgres => &POSTGRES_PORT_RE,
            Engine::Redis => &REDIS_PORT_RE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseReport {
    pub service: &'static str,
    pub status: String,
    pub process_count: u32,
    pub accessible: bool,
    pub ports: Vec<ListeningPort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Engine specific counters (`SHOW GLOBAL STATUS`, `pg_stat_*`, `INFO server`).
    #[serde(flatten)]
    pub stats: Map<String, Value>,
}

pub struct DatabaseCollector;

impl DatabaseCollector {
    async fn inspect(
        &self,
        host: &str,
        ctx: &CollectContext<'_>,
        engine: Engine,
    ) -> Result<DatabaseReport, PoolError> {
        let outputs = ctx
            .pool
            .execute_batch(host, engine.commands(), Some(COMMAND_TIMEOUT))
            .await?;
        let mut report = database_report(engine, &outputs);

        if report.accessible
            && let Some(commands) = engine.stats_commands()
        {
            match ctx.pool.execute_batch(host, commands, Some(STATS_TIMEOUT)).await {
                Ok(stats) => {
                    report.stats = match engine {
                        Engine::MySql => mysql_stats(&stats),
                        _ => postgres_stats(&stats),
                    }
                }
                Err(e) => {
                    warn!(host, database = engine.key(), error = %e, "failed to get database stats")
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl Collector for DatabaseCollector {
    fn name(&self) -> &str {
        "database"
    }

    fn description(&self) -> &str {
        "Database metrics (MySQL, PostgreSQL, Redis)"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Engines with no running process are left out; a failure while inspecting one
    /// engine is reported under that engine's key only.
    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value> {
        let detected = ctx
            .pool
            .execute_batch(host, &DATABASE_DETECT, Some(DETECT_TIMEOUT))
            .await?;

        let mut results = Map::new();
        for (engine, processes) in Engine::ALL.into_iter().zip(&detected) {
            if count(processes) == 0 {
                continue;
            }
            let report = match self.inspect(host, ctx, engine).await {
                Ok(report) => serde_json::to_value(report)?,
                Err(e) => {
                    error!(host, error = %e, operation = engine.key(), "failed to collect database metrics");
                    server_error(engine.key(), &e)
                }
            };
            results.insert(engine.key().into(), report);
        }
        Ok(Value::Object(results))
    }
}

/// Outputs in the engine's command order (`MYSQL_COMMANDS` and friends).
pub fn database_report(engine: Engine, outputs: &[String]) -> DatabaseReport {
    // mysql and psql print their result table before the marker
    let reachable = outputs[3]
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or_default();
    let (accessible, version, stats) = match engine {
        Engine::MySql => (reachable == "accessible", parse_mysql_version(&outputs[4]), Map::new()),
        Engine::Postgres => (
            reachable == "accessible",
            parse_postgres_version(&outputs[4]),
            Map::new(),
        ),
        Engine::Redis => {
            let info = if outputs[4].trim() == "info_unavailable" {
                Map::new()
            } else {
                parse_redis_info(&outputs[4])
            };
            (reachable == "PONG", None, info)
        }
    };
    DatabaseReport {
        service: engine.key(),
        status: first_line(&outputs[1]),
        process_count: count(&outputs[0]),
        accessible,
        ports: parse_ports(&outputs[2], engine.port_re()),
        version,
        stats,
    }
}

pub fn parse_mysql_version(output: &str) -> Option<String> {
    if output.trim() == "version_unavailable" {
        return None;
    }
    MYSQL_VERSION_RE.captures(output).map(|c| c[1].to_string())
}

pub fn parse_postgres_version(output: &str) -> Option<String> {
    if output.trim() == "version_unavailable" {
        return None;
    }
    POSTGRES_VERSION_RE.captures(output).map(|c| c[1].to_string())
}

/// Value column of a `SHOW GLOBAL STATUS LIKE ...` result (header line, then one row).
pub fn parse_mysql_status_value(output: &str) -> Option<u64> {
    let row = output.trim().lines().nth(1)?;
    row.split('\t').nth(1)?.trim().parse().ok()
}

/// Outputs in [`MYSQL_STATS_COMMANDS`] order.
pub fn mysql_stats(outputs: &[String]) -> Map<String, Value> {
    let mut stats = Map::new();
    for (key, output) in ["connections", "threads_connected", "uptime", "questions"]
        .into_iter()
        .zip(outputs)
    {
        if let Some(value) = parse_mysql_status_value(output) {
            stats.insert(key.into(), value.into());
        }
    }
    // `SHOW DATABASES` prints a header line
    if let Some(lines) = outputs.get(4).and_then(|o| o.trim().parse::<u64>().ok()) {
        stats.insert("database_count".into(), lines.saturating_sub(1).into());
    }
    stats
}

/// Outputs in [`POSTGRES_STATS_COMMANDS`] order.
pub fn postgres_stats(outputs: &[String]) -> Map<String, Value> {
    let mut stats = Map::new();
    let int = |output: Option<&String>| -> Option<u64> {
        PSQL_INT_RE.captures(output?)?[1].parse().ok()
    };
    if let Some(connections) = int(outputs.first()) {
        stats.insert("active_connections".into(), connections.into());
    }
    if let Some(databases) = int(outputs.get(1)) {
        stats.insert("database_count".into(), databases.into());
    }
    if let Some(uptime) = outputs
        .get(2)
        .and_then(|o| PSQL_FLOAT_RE.captures(o))
        .and_then(|c| c[1].parse::<f64>().ok())
    {
        stats.insert("uptime_seconds".into(), uptime.into());
    }
    stats
}

/// `INFO` sections as a flat map; integers and decimals become numbers.
pub fn parse_redis_info(output: &str) -> Map<String, Value> {
    let mut info = Map::new();
    for line in output.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        let parsed = if REDIS_TEXT_FIELDS.contains(&key) {
            Value::from(value)
        } else if let Ok(n) = value.parse::<u64>() {
            Value::from(n)
        } else if value.contains('.')
            && value.chars().all(|c| c.is_ascii_digit() || c == '.')
            && let Ok(f) = value.parse::<f64>()
        {
            Value::from(f)
        } else {
            Value::from(value)
        };
        info.insert(key.to_string(), parsed);
    }
    info
}
