//! Reporting and escalation for offers rejected by a full queue

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::InboxError;
use super::signal::InboxMessage;
use crate::core::config::QueueFullConfig;
use crate::core::shutdown::fatal_exit;

/// Called when a timed offer into an inbox fails.
///
/// The handler owns the rejected message and is expected to fail it.
pub trait QueueFullHandler<M>: Send + Sync {
    fn on_queue_full(&self, service: &str, size: usize, timeout: Duration, message: M);
}

/// What [`QueueFullPolicy`] did with one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullReport {
    Logged { repeat: u64 },
    Suppressed { repeat: u64 },
    Fatal,
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    started: Instant,
    last: Instant,
    count: u64,
}

pub type FatalAction = Box<dyn Fn(i32) + Send + Sync>;

/// Default queue-full handler.
///
/// Reports close together form a burst. The first report of a burst and
/// every `log_every`th one are logged; a burst that outlives `fatal_after`
/// triggers the fatal action once.
pub struct QueueFullPolicy {
    config: QueueFullConfig,
    burst: Mutex<Option<Burst>>,
    fatal: FatalAction,
    fired: AtomicBool,
}

impl QueueFullPolicy {
    pub fn new(config: QueueFullConfig) -> Self {
        Self::with_fatal(config, Box::new(|code| {
            fatal_exit(code);
        }))
    }

    pub fn with_fatal(config: QueueFullConfig, fatal: FatalAction) -> Self {
        Self {
            config,
            burst: Mutex::new(None),
            fatal,
            fired: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &QueueFullConfig {
        &self.config
    }

    pub fn report(&self, service: &str, size: usize, timeout: Duration) -> FullReport {
        self.report_at(service, size, timeout, Instant::now())
    }

    pub fn report_at(&self, service: &str, size: usize, timeout: Duration, now: Instant) -> FullReport {
        let burst = {
            let mut guard = self.burst.lock();
            let burst = match *guard {
                Some(mut burst)
                    if now.saturating_duration_since(burst.last) < self.config.burst_window() =>
                {
                    burst.count += 1;
                    burst.last = now;
                    burst
                }
                _ => Burst {
                    started: now,
                    last: now,
                    count: 1,
                },
            };
            *guard = Some(burst);
            burst
        };

        let sustained = now.saturating_duration_since(burst.started);
        if sustained >= self.config.fatal_after() && !self.fired.swap(true, Ordering::AcqRel) {
            log::error!(
                "full queue {} with {} entries for {}s; shutting down",
                service,
                size,
                sustained.as_secs()
            );
            (self.fatal)(self.config.exit_code);
            return FullReport::Fatal;
        }

        if burst.count == 1 || burst.count % self.config.log_every.max(1) == 0 {
            log::warn!(
                "full queue {} with {} entries after {}ms (repeated {} times)",
                service,
                size,
                timeout.as_millis(),
                burst.count
            );
            FullReport::Logged { repeat: burst.count }
        } else {
            FullReport::Suppressed { repeat: burst.count }
        }
    }
}

impl<M: InboxMessage> QueueFullHandler<M> for QueueFullPolicy {
    fn on_queue_full(&self, service: &str, size: usize, timeout: Duration, message: M) {
        self.report(service, size, timeout);
        let error = InboxError::QueueFull {
            service: service.to_string(),
            size,
            timeout_ms: timeout.as_millis(),
            message: message.describe(),
        };
        message.fail(error);
    }
}

impl std::fmt::Debug for QueueFullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFullPolicy")
            .field("config", &self.config)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish()
    }
}
