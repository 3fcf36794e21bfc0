// Snapshot rendering: aligned text for terminals, one JSON object per line for pipes.

use crate::models::MetricRecord;
use crate::platform::Platform;
use crate::pool::ServerStatus;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub host: String,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub metrics: BTreeMap<String, MetricRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub hosts: Vec<HostSnapshot>,
}

pub fn render(snapshot: &Snapshot, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(snapshot)?),
        OutputFormat::Text => Ok(render_text(snapshot)),
    }
}

pub fn render_text(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {} ==",
        snapshot.taken_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    for host in &snapshot.hosts {
        let platform = host.platform.map(|p| p.as_str()).unwrap_or("?");
        let _ = writeln!(out, "{} [{}, {}]", host.host, host.status, platform);
        if host.metrics.is_empty() {
            let _ = writeln!(out, "  (no collectors enabled)");
        }
        for (name, record) in &host.metrics {
            let _ = writeln!(out, "  {:<10} {}", name, summarize(record));
        }
    }
    out
}

/// One-line digest of a record. Collectors without a dedicated digest show their keys.
pub fn summarize(record: &MetricRecord) -> String {
    if let Some(error) = &record.error {
        return match record.last_success_at {
            Some(at) => {
                let ago = (Utc::now() - at).num_seconds().max(0);
                format!("ERROR: {error} (last ok {ago}s ago)")
            }
            None => format!("ERROR: {error}"),
        };
    }
    let payload = &record.payload;
    let digest = match record.collector.as_str() {
        "system" => summarize_system(payload),
        "process" => summarize_groups(payload, |name, group| {
            format!("{name} x{}", group["count"].as_u64().unwrap_or(0))
        }),
        "service" => summarize_groups(&payload["services"], |name, svc| {
            format!("{name}:{}", svc["status"].as_str().unwrap_or("unknown"))
        }),
        "database" | "webserver" => summarize_groups(payload, |name, server| {
            format!("{name}({})", server["status"].as_str().unwrap_or("unknown"))
        }),
        _ => None,
    };
    digest.unwrap_or_else(|| match payload.as_object() {
        Some(map) if !map.is_empty() => map.keys().cloned().collect::<Vec<_>>().join(" "),
        _ => "-".to_string(),
    })
}

fn summarize_system(payload: &Value) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(cpu) = payload["cpu"]["usage_percent"].as_f64() {
        parts.push(format!("cpu {cpu:.1}%"));
    }
    if let Some(mem) = payload["memory"]["usage_percent"].as_f64() {
        parts.push(format!("mem {mem:.1}%"));
    }
    if let Some(disks) = payload["disk"].as_array()
        && let Some(fullest) = disks
            .iter()
            .filter_map(|d| Some((d["mount_point"].as_str()?, d["usage_percent"].as_f64()?)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    {
        parts.push(format!("disk {} {:.0}%", fullest.0, fullest.1));
    }
    let load = &payload["load"];
    if let (Some(one), Some(five), Some(fifteen)) = (
        load["1min"].as_f64(),
        load["5min"].as_f64(),
        load["15min"].as_f64(),
    ) {
        parts.push(format!("load {one:.2} {five:.2} {fifteen:.2}"));
    }
    (!parts.is_empty()).then(|| parts.join("  "))
}

fn summarize_groups(value: &Value, entry: impl Fn(&str, &Value) -> String) -> Option<String> {
    let map = value.as_object()?;
    if map.is_empty() {
        return Some("none".to_string());
    }
    Some(
        map.iter()
            .map(|(name, v)| entry(name, v))
            .collect::<Vec<_>>()
            .join(" "),
    )
}
