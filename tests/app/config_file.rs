use clap::Parser;
use courier::app::cli::Args;
use courier::app::startup::resolve_config;
use courier::core::config::{ConfigError, CourierConfig};
use courier::core::logging::LogFormat;

use crate::common::write_config;

#[test]
fn test_config_file_flag_loads_file() {
    let (_dir, path) = write_config(
        r#"
[queue]
initial-size = 8
capacity = 128

[inbox]
send-timeout-ms = 250

[logging]
format = "ext"
"#,
    );

    let args = Args::try_parse_from(["courier", "--config-file", path.to_str().unwrap(), "config"]).unwrap();
    let config = resolve_config(&args).unwrap();

    assert_eq!(config.queue.initial_size, 8);
    assert_eq!(config.queue.capacity, 128);
    assert_eq!(config.inbox.send_timeout_ms, 250);
    assert_eq!(config.logging.format, LogFormat::Ext);
    // untouched sections keep their defaults
    assert_eq!(config.queue_full, CourierConfig::default().queue_full);
}

#[test]
fn test_flags_override_file() {
    let (_dir, path) = write_config(
        r#"
[logging]
level = "warn"
format = "json"
"#,
    );

    let args = Args::try_parse_from([
        "courier",
        "-c",
        path.to_str().unwrap(),
        "bench",
        "--log-level",
        "trace",
        "--capacity",
        "32",
    ])
    .unwrap();
    let config = resolve_config(&args).unwrap();

    assert_eq!(config.logging.level, "trace");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.queue.capacity, 32);
    assert_eq!(config.queue.initial_size, 16);
}

#[test]
fn test_override_that_breaks_validation_is_rejected() {
    let args = Args::try_parse_from(["courier", "bench", "--capacity", "100"]).unwrap();
    let (_dir, path) = write_config("");
    let args = Args {
        config_file: Some(path),
        ..args
    };

    let err = resolve_config(&args).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "unexpected error: {err}");
}

#[test]
fn test_missing_config_file_reports_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let args = Args::try_parse_from(["courier", "-c", path.to_str().unwrap(), "config"]).unwrap();

    let err = resolve_config(&args).unwrap_err();
    assert!(err.to_string().contains("absent.toml"), "unexpected error: {err}");
}

#[test]
fn test_written_config_loads_back() {
    let mut config = CourierConfig::default();
    config.queue.capacity = 256;
    config.queue_full.log_every = 7;
    let (_dir, path) = write_config(&config.to_toml().unwrap());

    let loaded = CourierConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}
