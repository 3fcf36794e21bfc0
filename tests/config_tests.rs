// Config loading and validation tests

use rsmon::config::AppConfig;
use std::io::Write;
use std::time::Duration;

const VALID_CONFIG: &str = r#"
[general]
poll_interval_secs = 2.0
connection_timeout_secs = 15.0
command_timeout_secs = 10.0
retry_attempts = 4
retry_delay_secs = 0.5
log_level = "debug"

[[servers]]
name = "web-1"
hostname = "10.0.0.5"
username = "monitor"
key_filename = "/keys/id_ed25519"
tags = ["prod"]

[[servers]]
name = "db-1"
hostname = "10.0.0.6"
username = "monitor"
port = 2222

[collectors.system]
interval_secs = 1.5

[collectors.process]
monitored = ["node"]

[collectors.webserver]
enabled = false
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.servers.len(), 2);
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert_eq!(config.command_timeout(), Duration::from_secs(10));

    let retry = config.retry_policy();
    assert_eq!(retry.max_retries, 4);
    assert_eq!(retry.retry_delay, Duration::from_millis(500));

    assert_eq!(config.server_names(), vec!["web-1", "db-1"]);
    assert_eq!(config.collector("process").unwrap().monitored, vec!["node"]);
}

#[test]
fn test_host_targets_apply_defaults() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let targets = config.host_targets();

    assert_eq!(targets[0].port, 22);
    assert_eq!(targets[0].destination(), "monitor@10.0.0.5");
    assert_eq!(
        targets[0].key_filename.as_deref(),
        Some(std::path::Path::new("/keys/id_ed25519"))
    );
    assert_eq!(targets[0].connect_timeout, Duration::from_secs(15));
    assert_eq!(targets[1].port, 2222);
    assert_eq!(targets[1].key_filename, None);
}

#[test]
fn test_collectors_enabled_by_default_with_interval_overrides() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();

    assert!(config.collector_enabled("system"));
    assert!(config.collector_enabled("process"));
    assert!(config.collector_enabled("service"));
    assert!(!config.collector_enabled("webserver"));

    let intervals = config.collector_intervals();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals["system"], Duration::from_millis(1500));
}

#[test]
fn test_general_section_is_optional() {
    let config = AppConfig::load_from_str(
        r#"
[[servers]]
name = "a"
hostname = "a.local"
username = "u"
"#,
    )
    .unwrap();
    assert_eq!(config.general.retry_attempts, 3);
    assert_eq!(config.poll_interval(), Duration::from_secs(2));
    assert!(config.collectors.is_empty());
}

#[test]
fn test_config_validation_rejects_no_servers() {
    let err = AppConfig::load_from_str("[general]\npoll_interval_secs = 1.0\n").unwrap_err();
    assert!(err.to_string().contains("servers"));
}

#[test]
fn test_config_validation_rejects_duplicate_names() {
    let bad = VALID_CONFIG.replace("name = \"db-1\"", "name = \"web-1\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("duplicate"), "{err}");
    assert!(err.to_string().contains("servers[1].name"), "{err}");
}

#[test]
fn test_config_validation_rejects_port_zero() {
    let bad = VALID_CONFIG.replace("port = 2222", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("servers[1].port"));
}

#[test]
fn test_config_validation_rejects_empty_hostname() {
    let bad = VALID_CONFIG.replace("hostname = \"10.0.0.6\"", "hostname = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("servers[1].hostname"));
}

#[test]
fn test_config_validation_rejects_non_positive_intervals() {
    let bad = VALID_CONFIG.replace("poll_interval_secs = 2.0", "poll_interval_secs = 0.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("general.poll_interval_secs"));

    let bad = VALID_CONFIG.replace("retry_delay_secs = 0.5", "retry_delay_secs = -1.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("general.retry_delay_secs"));

    let bad = VALID_CONFIG.replace("interval_secs = 1.5", "interval_secs = nan");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("collectors.system.interval_secs"));
}

#[test]
fn test_config_validation_rejects_unrepresentable_durations() {
    let bad = VALID_CONFIG.replace("poll_interval_secs = 2.0", "poll_interval_secs = 1e30");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("general.poll_interval_secs"), "{err}");

    let bad = VALID_CONFIG.replace("command_timeout_secs = 10.0", "command_timeout_secs = inf");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("general.command_timeout_secs"), "{err}");
}

#[test]
fn test_config_validation_rejects_durations_below_one_millisecond() {
    let bad = VALID_CONFIG.replace("poll_interval_secs = 2.0", "poll_interval_secs = 1e-12");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("general.poll_interval_secs"), "{err}");

    let bad = VALID_CONFIG.replace("interval_secs = 1.5", "interval_secs = 0.0001");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("collectors.system.interval_secs"), "{err}");

    let ok = VALID_CONFIG.replace("poll_interval_secs = 2.0", "poll_interval_secs = 0.25");
    let config = AppConfig::load_from_str(&ok).unwrap();
    assert_eq!(config.poll_interval(), Duration::from_millis(250));
}

#[test]
fn test_config_validation_rejects_zero_retry_attempts() {
    let bad = VALID_CONFIG.replace("retry_attempts = 4", "retry_attempts = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("general.retry_attempts"));
}

#[test]
fn test_config_validation_rejects_unknown_collector() {
    let bad = format!("{VALID_CONFIG}\n[collectors.mailserver]\nenabled = true\n");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("collectors.mailserver"));
}

#[test]
fn test_config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(VALID_CONFIG.as_bytes()).unwrap();

    let config = AppConfig::load_from_path(file.path()).unwrap();
    assert_eq!(config.servers[1].name, "db-1");

    let err = AppConfig::load_from_path("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.toml"));
}
