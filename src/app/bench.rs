//! The `bench` command: messages through a chain of inboxes
//!
//! Every inbox forwards each message to the next one through the outbox, so
//! the run exercises the inline hand-off as well as queued delivery. The
//! last inbox counts arrivals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;

use super::cli::{BenchArgs, BenchMode, ExecutorKind};
use crate::core::config::CourierConfig;
use crate::deliver::{Deliver, DeliverResult, Executor, Outbox, ShutdownMode, ThreadPool, TokioExecutor};
use crate::inbox::{Inbox, InboxBuilder, InboxResult, Latch, Mail};

type BenchMail = Mail<u64>;

/// Shared tally of arrivals at the end of the chain.
#[derive(Debug)]
pub struct Arrivals {
    count: AtomicU64,
    checksum: AtomicU64,
    expected: AtomicU64,
    done: Latch,
}

impl Arrivals {
    fn new(expected: u64) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU64::new(0),
            checksum: AtomicU64::new(0),
            expected: AtomicU64::new(expected),
            done: Latch::new(),
        })
    }

    fn record(&self, value: u64) {
        self.checksum.fetch_add(value, Ordering::Relaxed);
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.expected.load(Ordering::Acquire) {
            self.done.release();
        }
    }

    /// Lowers the target after the producer stopped early.
    fn expect(&self, expected: u64) {
        self.expected.store(expected, Ordering::Release);
        if self.count.load(Ordering::Acquire) >= expected {
            self.done.release();
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

/// One hop of the chain. Forwards to `next`, or records arrival at the end.
struct Hop {
    next: Option<Arc<Inbox<BenchMail>>>,
    arrivals: Arc<Arrivals>,
    forward: bool,
}

impl Deliver<BenchMail> for Hop {
    fn deliver(&mut self, msg: BenchMail, outbox: &mut Outbox<BenchMail>) -> DeliverResult<()> {
        let Some(value) = msg.into_body() else {
            return Ok(());
        };
        if !self.forward {
            return Ok(());
        }

        match &self.next {
            Some(next) => outbox.offer(Mail::post(next, value)),
            None => self.arrivals.record(value),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "hop"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    pub mode: BenchMode,
    pub executor: ExecutorKind,
    pub hops: u16,
    pub sent: u64,
    pub delivered: u64,
    pub checksum_ok: bool,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn deliveries_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.delivered * u64::from(self.hops)) as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.delivered == self.sent && self.checksum_ok
    }
}

impl std::fmt::Display for BenchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_complete() {
            "complete".green()
        } else {
            "incomplete".red().bold()
        };
        writeln!(
            f,
            "{} mode={} executor={} hops={}",
            "bench".bold(),
            self.mode,
            self.executor,
            self.hops
        )?;
        writeln!(f, "  sent       {}", self.sent)?;
        writeln!(f, "  delivered  {} ({})", self.delivered, status)?;
        writeln!(f, "  elapsed    {:.3}s", self.elapsed.as_secs_f64())?;
        write!(f, "  throughput {:.0} deliveries/s", self.deliveries_per_sec())
    }
}

/// Builds the chain back to front; the first inbox is the entry point.
fn build_chain(
    args: &BenchArgs,
    config: &CourierConfig,
    executor: &Arc<dyn Executor>,
    arrivals: &Arc<Arrivals>,
) -> InboxResult<Vec<Arc<Inbox<BenchMail>>>> {
    let mut chain: Vec<Arc<Inbox<BenchMail>>> = Vec::with_capacity(usize::from(args.hops));
    let workers = usize::from(args.workers);

    for index in (0..args.hops).rev() {
        let next = chain.last().cloned();
        let hop = |forward: bool| -> Box<dyn Deliver<BenchMail>> {
            Box::new(Hop {
                next: next.clone(),
                arrivals: arrivals.clone(),
                forward,
            })
        };

        let builder = InboxBuilder::from_config(format!("hop{}", index), config).executor(executor.clone());
        let inbox = match args.mode {
            BenchMode::Single => builder.build(hop(true))?,
            BenchMode::Multi => builder.build_multi(|_| hop(true), workers)?,
            BenchMode::Disruptor => {
                // only the last stage passes the message on
                let stages = (0..workers).map(|stage| hop(stage + 1 == workers)).collect();
                builder.disruptor(stages)?
            }
        };
        inbox.init()?;
        chain.push(inbox);
    }

    chain.reverse();
    Ok(chain)
}

/// Runs the benchmark on the calling thread until every message arrived or
/// `stop` is raised.
pub fn run_blocking(
    args: &BenchArgs,
    config: &CourierConfig,
    executor: Arc<dyn Executor>,
    stop: &AtomicBool,
) -> InboxResult<BenchReport> {
    let arrivals = Arrivals::new(args.messages);
    let chain = build_chain(args, config, &executor, &arrivals)?;
    let Some(first) = chain.first().cloned() else {
        return Ok(BenchReport {
            mode: args.mode,
            executor: args.executor,
            hops: 0,
            sent: 0,
            delivered: 0,
            checksum_ok: true,
            elapsed: Duration::ZERO,
        });
    };

    log::info!(
        "bench: {} messages through {} {} inboxes",
        args.messages,
        args.hops,
        args.mode
    );

    let started = Instant::now();
    let mut sent = 0u64;
    while sent < args.messages && !stop.load(Ordering::Acquire) {
        if first.offer_and_wake(Mail::post(&first, sent)) {
            sent += 1;
        } else {
            log::warn!("bench: message {} rejected by {}", sent, first.name());
            break;
        }
    }
    arrivals.expect(sent);

    while !arrivals.done.wait(Duration::from_millis(50)) {
        if stop.load(Ordering::Acquire) {
            break;
        }
    }
    let elapsed = started.elapsed();

    let mode = if stop.load(Ordering::Acquire) {
        ShutdownMode::Immediate
    } else {
        ShutdownMode::Graceful
    };
    for inbox in &chain {
        inbox.shutdown(mode);
    }

    let delivered = arrivals.count();
    let expected_sum = if sent > 0 { sent * (sent - 1) / 2 } else { 0 };
    Ok(BenchReport {
        mode: args.mode,
        executor: args.executor,
        hops: args.hops,
        sent,
        delivered,
        checksum_ok: arrivals.checksum.load(Ordering::Acquire) == expected_sum,
        elapsed,
    })
}

/// Creates the executor named on the command line.
///
/// Must be called from within the tokio runtime for [`ExecutorKind::Tokio`].
pub fn executor_for(kind: ExecutorKind, workers: u16) -> InboxResult<Arc<dyn Executor>> {
    let executor: Arc<dyn Executor> = match kind {
        ExecutorKind::Pool => {
            let threads = std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4)
                .max(usize::from(workers));
            Arc::new(ThreadPool::new("bench", threads)?)
        }
        ExecutorKind::Tokio => Arc::new(TokioExecutor::current()?),
    };
    Ok(executor)
}
