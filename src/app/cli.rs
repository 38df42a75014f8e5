//! Command line arguments
//!
//! Flags override the configuration file, which overrides the defaults.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::core::config::CourierConfig;
use crate::core::logging::LogFormat;

#[derive(Parser, Debug, Clone)]
#[command(name = "courier")]
#[command(about = "Actor-style message delivery engine")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Log level
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        value_parser = ["trace", "debug", "info", "warn", "error", "off"],
        global = true
    )]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Log file path
    #[arg(short = 'f', long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Push messages through a chain of inboxes and report throughput
    Bench(BenchArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BenchMode {
    /// One worker per inbox
    Single,
    /// Several workers racing on each inbox
    Multi,
    /// A pipeline of stages per inbox
    Disruptor,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExecutorKind {
    /// Dedicated thread pool
    Pool,
    /// Blocking threads of the tokio runtime
    Tokio,
}

#[derive(ClapArgs, Debug, Clone, PartialEq, Eq)]
pub struct BenchArgs {
    /// Worker shape of every inbox
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = BenchMode::Single)]
    pub mode: BenchMode,

    /// Messages to send
    #[arg(short = 'n', long = "messages", value_name = "COUNT", default_value_t = 100_000)]
    pub messages: u64,

    /// Inboxes each message passes through
    #[arg(short = 'H', long = "hops", value_name = "COUNT", default_value_t = 4,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub hops: u16,

    /// Workers (multi) or stages (disruptor) per inbox
    #[arg(short = 'w', long = "workers", value_name = "COUNT", default_value_t = 4,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Where worker runs execute
    #[arg(short = 'e', long = "executor", value_enum, default_value_t = ExecutorKind::Pool)]
    pub executor: ExecutorKind,

    /// Maximum queue size, overriding the configuration
    #[arg(long = "capacity", value_name = "SIZE")]
    pub capacity: Option<usize>,
}

impl Args {
    /// Applies flag overrides to a loaded configuration.
    pub fn apply(&self, config: &mut CourierConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if self.no_color {
            config.logging.color = false;
        }

        if let Command::Bench(bench) = &self.command {
            if let Some(capacity) = bench.capacity {
                config.queue.capacity = capacity;
                config.queue.initial_size = config.queue.initial_size.min(capacity);
            }
        }
    }
}
