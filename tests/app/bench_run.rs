use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use courier::app::bench::{executor_for, run_blocking};
use courier::app::cli::{BenchArgs, BenchMode, ExecutorKind};
use courier::deliver::{Executor, ThreadPool};

use crate::common::small_queue_config;

fn args(mode: BenchMode, messages: u64) -> BenchArgs {
    BenchArgs {
        mode,
        messages,
        hops: 3,
        workers: 3,
        executor: ExecutorKind::Pool,
        capacity: None,
    }
}

fn pool() -> Arc<dyn Executor> {
    Arc::new(ThreadPool::new("bench-test", 4).unwrap())
}

#[test]
fn test_single_chain_delivers_everything() {
    let stop = AtomicBool::new(false);
    let report = run_blocking(&args(BenchMode::Single, 2_000), &small_queue_config(), pool(), &stop).unwrap();

    assert_eq!(report.sent, 2_000);
    assert_eq!(report.delivered, 2_000);
    assert!(report.checksum_ok);
    assert!(report.is_complete());
}

#[test]
fn test_multi_chain_delivers_everything() {
    let stop = AtomicBool::new(false);
    let report = run_blocking(&args(BenchMode::Multi, 2_000), &small_queue_config(), pool(), &stop).unwrap();

    assert!(report.is_complete(), "{report}");
}

#[test]
fn test_disruptor_chain_delivers_once_per_message() {
    let stop = AtomicBool::new(false);
    let report = run_blocking(&args(BenchMode::Disruptor, 1_000), &small_queue_config(), pool(), &stop).unwrap();

    // only the final stage forwards, so each message arrives once
    assert_eq!(report.delivered, 1_000);
    assert!(report.is_complete(), "{report}");
}

#[test]
fn test_raised_stop_sends_nothing() {
    let stop = AtomicBool::new(true);
    let report = run_blocking(&args(BenchMode::Single, 500), &small_queue_config(), pool(), &stop).unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(report.delivered, 0);
    assert!(report.is_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_executor_runs_chain() {
    let executor = executor_for(ExecutorKind::Tokio, 2).unwrap();
    let bench = BenchArgs {
        executor: ExecutorKind::Tokio,
        ..args(BenchMode::Single, 500)
    };

    let report = tokio::task::spawn_blocking(move || {
        let stop = AtomicBool::new(false);
        run_blocking(&bench, &small_queue_config(), executor, &stop)
    })
    .await
    .unwrap()
    .unwrap();

    assert!(report.is_complete(), "{report}");
    assert_eq!(report.executor, ExecutorKind::Tokio);
}

#[test]
#[ignore = "slow"]
fn test_long_single_chain() {
    let stop = AtomicBool::new(false);
    let bench = BenchArgs {
        hops: 16,
        ..args(BenchMode::Single, 200_000)
    };
    let report = run_blocking(&bench, &small_queue_config(), pool(), &stop).unwrap();

    assert!(report.is_complete(), "{report}");
}
