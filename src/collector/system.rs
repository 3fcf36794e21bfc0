// System collector: CPU, memory, disk and load in one batched round trip.

use super::{CollectContext, Collector};
use crate::platform::Platform;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

static BSD_CPU_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CPU:\s*(\d+\.?\d*)%\s*user.*?(\d+\.?\d*)%\s*idle").expect("valid regex")
});
static MACOS_CPU_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CPU usage:\s*(\d+\.?\d*)%\s*user.*?(\d+\.?\d*)%\s*sys.*?(\d+\.?\d*)%\s*idle")
        .expect("valid regex")
});
static MEMINFO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\w+):\s*(\d+)\s*kB").expect("valid regex"));
static VM_PAGE_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"page size of (\d+) bytes").expect("valid regex"));
static VM_STAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Pages ([\w ]+):\s*(\d+)").expect("valid regex"));
static LOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)load averages?:\s*(\d+\.?\d*)[,\s]+(\d+\.?\d*)[,\s]+(\d+\.?\d*)")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuUsage {
    pub usage_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iowait: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffers_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_free_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wired_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub filesystem: String,
    pub mount_point: String,
    pub size: String,
    pub used: String,
    pub available: String,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    #[serde(rename = "1min")]
    pub one: f64,
    #[serde(rename = "5min")]
    pub five: f64,
    #[serde(rename = "15min")]
    pub fifteen: f64,
}

pub struct SystemCollector;

#[async_trait]
impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn description(&self) -> &str {
        "System metrics (CPU, memory, disk, load)"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value> {
        let commands = [
            ctx.commands.cpu_usage,
            ctx.commands.memory_info,
            ctx.commands.disk_usage,
            ctx.commands.uptime,
        ];
        let results = ctx
            .pool
            .execute_batch(host, &commands, Some(COMMAND_TIMEOUT))
            .await?;

        Ok(json!({
            "cpu": section(parse_cpu(&results[0], ctx.platform)),
            "memory": section(parse_memory(&results[1], ctx.platform)),
            "disk": serde_json::to_value(parse_disk(&results[2]))?,
            "load": serde_json::to_value(parse_load(&results[3]))?,
        }))
    }
}

/// A section that failed to parse is reported inline; the rest of the payload survives.
fn section<T: Serialize>(parsed: anyhow::Result<T>) -> Value {
    parsed
        .and_then(|v| serde_json::to_value(v).map_err(Into::into))
        .unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        round2(part / total * 100.0)
    } else {
        0.0
    }
}

pub fn parse_cpu(output: &str, platform: Platform) -> anyhow::Result<CpuUsage> {
    match platform {
        Platform::Linux | Platform::Unknown => parse_linux_cpu(output),
        Platform::FreeBsd | Platform::OpenBsd => parse_bsd_cpu(output),
        Platform::MacOs => parse_macos_cpu(output),
    }
}

/// Aggregate `cpu` line of `/proc/stat`: busy = user + nice + system, over busy + idle.
pub fn parse_linux_cpu(output: &str) -> anyhow::Result<CpuUsage> {
    let line = output
        .lines()
        .next()
        .ok_or_else(|| anyhow!("empty /proc/stat output"))?;
    let mut fields = line.split_whitespace();
    if !fields.next().is_some_and(|label| label.starts_with("cpu")) {
        return Err(anyhow!("invalid /proc/stat format"));
    }
    let values = fields
        .take(5)
        .map(|v| v.parse::<u64>().with_context(|| format!("bad /proc/stat value '{v}'")))
        .collect::<anyhow::Result<Vec<u64>>>()?;
    let [user, nice, system, idle, ..] = values[..] else {
        return Err(anyhow!("truncated /proc/stat cpu line"));
    };
    let iowait = values.get(4).copied();

    let busy = user
        .checked_add(nice)
        .and_then(|v| v.checked_add(system))
        .ok_or_else(|| anyhow!("/proc/stat counters overflow"))?;
    let total = busy
        .checked_add(idle)
        .ok_or_else(|| anyhow!("/proc/stat counters overflow"))?;
    Ok(CpuUsage {
        usage_percent: percent(busy as f64, total as f64),
        user: Some(user as f64),
        system: Some(system as f64),
        idle: Some(idle as f64),
        iowait: iowait.map(|v| v as f64),
    })
}

pub fn parse_bsd_cpu(output: &str) -> anyhow::Result<CpuUsage> {
    let caps = BSD_CPU_RE
        .captures(output)
        .ok_or_else(|| anyhow!("could not parse CPU usage"))?;
    let user: f64 = caps[1].parse()?;
    let idle: f64 = caps[2].parse()?;
    Ok(CpuUsage {
        usage_percent: round2(100.0 - idle),
        user: Some(user),
        system: None,
        idle: Some(idle),
        iowait: None,
    })
}

pub fn parse_macos_cpu(output: &str) -> anyhow::Result<CpuUsage> {
    let caps = MACOS_CPU_RE
        .captures(output)
        .ok_or_else(|| anyhow!("could not parse CPU usage"))?;
    let user: f64 = caps[1].parse()?;
    let system: f64 = caps[2].parse()?;
    let idle: f64 = caps[3].parse()?;
    Ok(CpuUsage {
        usage_percent: round2(100.0 - idle),
        user: Some(user),
        system: Some(system),
        idle: Some(idle),
        iowait: None,
    })
}

pub fn parse_memory(output: &str, platform: Platform) -> anyhow::Result<MemoryUsage> {
    match platform {
        Platform::Linux | Platform::Unknown => parse_linux_memory(output),
        Platform::FreeBsd | Platform::OpenBsd => parse_bsd_memory(output),
        Platform::MacOs => parse_macos_memory(output),
    }
}

/// `/proc/meminfo`; all values converted from kB to bytes.
pub fn parse_linux_memory(output: &str) -> anyhow::Result<MemoryUsage> {
    let mut fields = std::collections::HashMap::new();
    for caps in MEMINFO_RE.captures_iter(output) {
        if let Ok(kb) = caps[2].parse::<u64>() {
            let bytes = kb
                .checked_mul(1024)
                .ok_or_else(|| anyhow!("meminfo {} out of range", &caps[1]))?;
            fields.insert(caps[1].to_string(), bytes);
        }
    }
    let (Some(&total), Some(&available)) = (fields.get("MemTotal"), fields.get("MemAvailable"))
    else {
        return Err(anyhow!("could not parse memory info"));
    };
    let used = total.saturating_sub(available);
    Ok(MemoryUsage {
        total_bytes: total,
        used_bytes: used,
        usage_percent: percent(used as f64, total as f64),
        available_bytes: Some(available),
        free_bytes: fields.get("MemFree").copied(),
        buffers_bytes: Some(fields.get("Buffers").copied().unwrap_or(0)),
        cached_bytes: Some(fields.get("Cached").copied().unwrap_or(0)),
        swap_total_bytes: Some(fields.get("SwapTotal").copied().unwrap_or(0)),
        swap_free_bytes: Some(fields.get("SwapFree").copied().unwrap_or(0)),
        ..Default::default()
    })
}

/// `sysctl -n hw.physmem hw.usermem ...`: first line total, second line user memory.
pub fn parse_bsd_memory(output: &str) -> anyhow::Result<MemoryUsage> {
    let mut lines = output.lines().map(str::trim);
    let (Some(total), Some(user)) = (lines.next(), lines.next()) else {
        return Err(anyhow!("could not parse memory info"));
    };
    let total: u64 = total.parse().context("could not parse memory info")?;
    let used: u64 = user.parse().context("could not parse memory info")?;
    Ok(MemoryUsage {
        total_bytes: total,
        used_bytes: used,
        usage_percent: percent(used as f64, total as f64),
        ..Default::default()
    })
}

/// `vm_stat`: page counts times the reported page size; total is the sum of known pools.
pub fn parse_macos_memory(output: &str) -> anyhow::Result<MemoryUsage> {
    let page_size = VM_PAGE_SIZE_RE
        .captures(output)
        .and_then(|c| c[1].parse::<u64>().ok())
        .unwrap_or(4096);

    let mut pages = std::collections::HashMap::new();
    for caps in VM_STAT_RE.captures_iter(output) {
        let key = match caps[1].trim() {
            "free" => "free",
            "active" => "active",
            "inactive" => "inactive",
            "wired down" => "wired",
            "occupied by compressor" | "compressed" => "compressed",
            _ => continue,
        };
        if let Ok(count) = caps[2].parse::<u64>() {
            let bytes = count
                .checked_mul(page_size)
                .ok_or_else(|| anyhow!("vm_stat pages {key} out of range"))?;
            pages.insert(key, bytes);
        }
    }
    if pages.is_empty() {
        return Err(anyhow!("could not parse memory info"));
    }

    let total = pages
        .values()
        .try_fold(0u64, |acc, v| acc.checked_add(*v))
        .ok_or_else(|| anyhow!("vm_stat total out of range"))?;
    let free = pages.get("free").copied().unwrap_or(0);
    let used = total.saturating_sub(free);
    Ok(MemoryUsage {
        total_bytes: total,
        used_bytes: used,
        usage_percent: percent(used as f64, total as f64),
        free_bytes: Some(free),
        active_bytes: Some(pages.get("active").copied().unwrap_or(0)),
        inactive_bytes: Some(pages.get("inactive").copied().unwrap_or(0)),
        wired_bytes: Some(pages.get("wired").copied().unwrap_or(0)),
        ..Default::default()
    })
}

/// `df -h` rows; pseudo filesystems are skipped and names containing spaces are rejoined.
pub fn parse_disk(output: &str) -> Vec<DiskUsage> {
    let mut disks = Vec::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }
        let split = parts.len() - 5;
        let filesystem = parts[..split].join(" ");
        let [size, used, available, use_pct, mount] = parts[split..] else {
            continue;
        };
        if ["tmpfs", "proc", "sys", "dev"]
            .iter()
            .any(|pseudo| filesystem.starts_with(pseudo))
            || filesystem == "Filesystem"
        {
            continue;
        }
        let Ok(usage_percent) = use_pct.trim_end_matches('%').parse::<f64>() else {
            continue;
        };
        disks.push(DiskUsage {
            filesystem,
            mount_point: mount.to_string(),
            size: size.to_string(),
            used: used.to_string(),
            available: available.to_string(),
            usage_percent,
        });
    }
    disks
}

/// Load averages from `uptime`; zeros when the line is not recognised.
pub fn parse_load(output: &str) -> LoadAverage {
    LOAD_RE
        .captures(output)
        .and_then(|caps| {
            Some(LoadAverage {
                one: caps[1].parse().ok()?,
                five: caps[2].parse().ok()?,
                fifteen: caps[3].parse().ok()?,
            })
        })
        .unwrap_or_default()
}
