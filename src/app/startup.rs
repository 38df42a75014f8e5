//! Process startup: arguments, configuration, logging, then the command

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use super::bench;
use super::cli::{Args, BenchArgs, Command};
use crate::core::config::{ConfigError, CourierConfig};
use crate::core::error_handling::{log_error_with_context, ContextualError};
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::deliver::ShutdownMode;
use crate::inbox::InboxError;

/// Exit status for configuration and usage errors (EX_CONFIG).
pub const CONFIG_EXIT_CODE: i32 = 78;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Inbox(#[from] InboxError),

    #[error("Benchmark task failed: {0}")]
    Task(String),

    #[error("Benchmark incomplete: {delivered} of {sent} messages delivered")]
    Incomplete { sent: u64, delivered: u64 },
}

impl ContextualError for StartupError {
    fn is_user_actionable(&self) -> bool {
        match self {
            StartupError::Config(err) => err.is_user_actionable(),
            StartupError::Inbox(err) => err.is_user_actionable(),
            StartupError::Task(_) | StartupError::Incomplete { .. } => false,
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            StartupError::Config(err) => err.user_message(),
            StartupError::Inbox(err) => err.user_message(),
            StartupError::Task(_) | StartupError::Incomplete { .. } => None,
        }
    }
}

/// Loads the configuration named by `args` and applies flag overrides.
pub fn resolve_config(args: &Args) -> Result<CourierConfig, ConfigError> {
    let mut config = CourierConfig::discover(args.config_file.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Runs the command line and returns the process exit status.
pub async fn startup() -> i32 {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            // logging is not up yet
            eprintln!("courier: {}", err);
            return CONFIG_EXIT_CODE;
        }
    };

    let logging = &config.logging;
    if let Err(err) = init_logging(&logging.level, logging.format, logging.file.as_deref(), logging.color) {
        eprintln!("courier: cannot initialise logging: {}", err);
        return CONFIG_EXIT_CODE;
    }
    if !logging.color {
        colored::control::set_override(false);
    }

    log::debug!(
        "courier {} (api {}, {} built {})",
        env!("CARGO_PKG_VERSION"),
        crate::DELIVER_API_VERSION,
        crate::GIT_HASH,
        crate::BUILD_TIME
    );

    match run(args.command, config).await {
        Ok(()) => 0,
        Err(err) => {
            log_error_with_context(&err, "courier command failed");
            match err {
                StartupError::Config(_) => CONFIG_EXIT_CODE,
                _ => 1,
            }
        }
    }
}

async fn run(command: Command, config: CourierConfig) -> Result<(), StartupError> {
    match command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Bench(bench_args) => {
            ShutdownCoordinator::guard(|coordinator, shutdown_rx| {
                run_bench(coordinator, shutdown_rx, bench_args, config)
            })
            .await
        }
    }
}

async fn run_bench(
    coordinator: ShutdownCoordinator,
    mut shutdown_rx: broadcast::Receiver<ShutdownMode>,
    bench_args: BenchArgs,
    config: CourierConfig,
) -> Result<(), StartupError> {
    let executor = bench::executor_for(bench_args.executor, bench_args.workers)?;
    let stop = Arc::new(AtomicBool::new(false));

    let task = {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || bench::run_blocking(&bench_args, &config, executor, &stop))
    };

    let watcher = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if shutdown_rx.recv().await.is_ok() {
                log::info!("bench: stopping");
                stop.store(true, Ordering::Release);
            }
        })
    };

    let outcome = task.await;
    watcher.abort();

    let report = outcome.map_err(|err| StartupError::Task(err.to_string()))??;
    println!("{}", report);

    if report.is_complete() || coordinator.is_shutdown_requested() {
        Ok(())
    } else {
        Err(StartupError::Incomplete {
            sent: report.sent,
            delivered: report.delivered,
        })
    }
}
