//! Shared helpers for integration tests

use std::io::Write;
use std::path::PathBuf;

use courier::core::config::CourierConfig;
use tempfile::TempDir;

/// Writes `contents` to a `courier.toml` inside a fresh temporary directory.
pub fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("courier.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

/// A configuration with small queues so tests hit resizing and back pressure.
pub fn small_queue_config() -> CourierConfig {
    let mut config = CourierConfig::default();
    config.queue.initial_size = 4;
    config.queue.capacity = 64;
    config.inbox.shutdown_wait_ms = 200;
    config
}
