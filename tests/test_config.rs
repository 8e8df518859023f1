mod common;
use common::*;

use solakon_bridge::prelude::*;

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn load(content: &str) -> anyhow::Result<ConfigWrapper> {
    let file = write_config(content);
    ConfigWrapper::new(file.path().to_string_lossy().into_owned())
}

#[test]
fn applies_defaults() {
    common_setup();

    let config = load(
        r#"
inverters:
  - host: 192.168.1.20
meters:
  - host: 192.168.1.21
"#,
    )
    .unwrap();

    let inverter = &config.enabled_inverters()[0];
    assert_eq!(inverter.port(), 502);
    assert_eq!(inverter.device_id(), 1);
    assert_eq!(inverter.timeout(), Duration::from_secs(5));
    assert_eq!(inverter.merge_gap(), 4);
    assert_eq!(inverter.max_block_size(), 100);
    assert_eq!(inverter.delay(), Duration::ZERO);
    assert_eq!(inverter.name(), "192.168.1.20:502");

    let meter = &config.enabled_meters()[0];
    assert_eq!(meter.port(), 80);
    assert_eq!(meter.timeout(), Duration::from_secs(10));

    assert_eq!(config.scheduler().interval(), Duration::from_secs(30));
    assert_eq!(config.loglevel(), "info");
    assert!(!config.read_only());
    assert!(!config.inverter_read_only(inverter));
}

#[test]
fn reads_every_setting() {
    let config = load(
        r#"
loglevel: debug
read_only: false
scheduler:
  interval: 10
inverters:
  - host: inverter.local
    port: 1502
    device_id: 3
    timeout: 2
    merge_gap: 0
    max_block_size: 50
    delay_ms: 20
    read_only: true
  - host: spare.local
    enabled: false
"#,
    )
    .unwrap();

    assert_eq!(config.inverters().len(), 2);
    assert_eq!(config.enabled_inverters().len(), 1);

    let inverter = config.inverter_with_host("inverter.local").unwrap();
    assert_eq!(inverter.port(), 1502);
    assert_eq!(inverter.device_id(), 3);
    assert_eq!(inverter.timeout(), Duration::from_secs(2));
    assert_eq!(inverter.delay(), Duration::from_millis(20));
    assert!(config.inverter_read_only(&inverter));

    let limits = ReadLimits::from_config(&inverter);
    assert_eq!(limits.max_gap, 0);
    assert_eq!(limits.max_block_size, 50);

    assert_eq!(config.scheduler().interval(), Duration::from_secs(10));
    assert_eq!(config.loglevel(), "debug");
}

#[test]
fn global_read_only_covers_every_inverter() {
    let config = Factory::config("read_only: true\ninverters:\n  - host: a\n");
    assert!(config.inverter_read_only(&config.inverters()[0]));
}

#[test]
fn rejects_invalid_settings() {
    for (yaml, expected) in [
        ("inverters:\n  - host: ''\n", "host cannot be empty"),
        ("inverters:\n  - host: a\n    device_id: 0\n", "device_id"),
        ("inverters:\n  - host: a\n    device_id: 248\n", "device_id"),
        ("inverters:\n  - host: a\n    max_block_size: 126\n", "max_block_size"),
        ("inverters:\n  - host: a\n    timeout: 0\n", "timeout"),
        ("meters:\n  - host: 'bad host'\n", "not a valid address"),
        ("scheduler:\n  interval: 0\n", "scheduler.interval"),
        ("scheduler:\n  interval: 301\n", "scheduler.interval"),
    ] {
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "{:?}: {} does not mention {}",
            yaml,
            err,
            expected
        );
    }
}

#[test]
fn disabled_entries_are_not_validated() {
    let config = Factory::config("inverters:\n  - host: ''\n    enabled: false\n");
    assert!(config.enabled_inverters().is_empty());
}

#[test]
fn missing_file_is_an_error() {
    let err = ConfigWrapper::new("/nonexistent/solakon.yaml".to_string()).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/solakon.yaml"));
}

#[test]
fn empty_config_has_no_devices() {
    let config = Factory::config("{}");
    let devices = solakon_bridge::Devices::from_config(&config).unwrap();
    assert!(devices.all().is_empty());
}

#[tokio::test]
async fn devices_from_config() {
    let config = Factory::config(
        "inverters:\n  - host: 127.0.0.1\n    port: 1502\nmeters:\n  - host: 127.0.0.1\n    port: 8080\n",
    );
    let devices = solakon_bridge::Devices::from_config(&config).unwrap();

    assert_eq!(devices.inverters.len(), 1);
    assert_eq!(devices.meters.len(), 1);
    let names: Vec<_> = devices.all().iter().map(|d| d.name().to_string()).collect();
    assert_eq!(names, vec!["127.0.0.1:1502", "127.0.0.1:8080"]);
}
