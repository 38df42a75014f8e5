//! Several workers racing on one shared queue

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::DeliverResult;
use super::handler::{begin_batch, deliver_one, end_batch, Deliver, ShutdownMode};
use super::outbox::Outbox;
use super::state::WorkerState;
use super::worker::{RunImpl, WorkerDeliver, WorkerRef};
use crate::queue::RingQueue;

/// One of N consumers of a shared queue.
///
/// Polls message by message instead of using the ring's batch drain, so that
/// a single member cannot hold the whole backlog while its peers idle. A pass
/// takes at most the number of messages queued when it started, so a steady
/// producer cannot keep one member inside a single pass.
pub struct MultiThread<M> {
    queue: Arc<dyn RingQueue<M>>,
    deliver: Mutex<Box<dyn Deliver<M>>>,
}

impl<M> MultiThread<M> {
    pub fn new(queue: Arc<dyn RingQueue<M>>, deliver: Box<dyn Deliver<M>>) -> Self {
        Self {
            queue,
            deliver: Mutex::new(deliver),
        }
    }
}

impl<M: Send + 'static> RunImpl<M> for MultiThread<M> {
    fn run_impl(&self, outbox: &mut Outbox<M>, tail: Option<M>) -> DeliverResult<()> {
        let mut deliver = self.deliver.lock();
        let handler: &mut dyn Deliver<M> = &mut **deliver;

        begin_batch(handler);
        if let Some(tail) = tail {
            deliver_one(handler, tail, outbox);
        }
        // bounded by the backlog seen on entry: later offers carry their own wakes
        let limit = self.queue.size();
        for _ in 0..limit {
            match self.queue.try_poll() {
                Some(msg) => {
                    deliver_one(handler, msg, outbox);
                }
                None => break,
            }
        }
        end_batch(handler);

        Ok(())
    }

    fn shutdown(&self, mode: ShutdownMode) {
        // a run in progress holds the handler; its owner delivers shutdown in-band
        match self.deliver.try_lock() {
            Some(mut deliver) => deliver.shutdown(mode),
            None => log::debug!("shutdown hook skipped: handler busy"),
        }
    }
}

/// Fans wakes out to a pool of [`MultiThread`] workers.
///
/// A wake starts roughly one worker per `offset` queued messages, at least
/// one and never more than the pool holds.
pub struct MultiCoordinator<M> {
    name: String,
    queue: Arc<dyn RingQueue<M>>,
    workers: Vec<WorkerRef<M>>,
    offset: usize,
    next: AtomicUsize,
}

impl<M> MultiCoordinator<M> {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn RingQueue<M>>,
        workers: Vec<WorkerRef<M>>,
        offset: usize,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            workers,
            offset: offset.max(1),
            next: AtomicUsize::new(0),
        }
    }

    pub fn workers(&self) -> &[WorkerRef<M>] {
        &self.workers
    }

    /// Number of workers a wake should reach for the current backlog.
    pub fn wanted(&self) -> usize {
        if self.workers.is_empty() {
            return 0;
        }
        self.queue
            .size()
            .div_ceil(self.offset)
            .clamp(1, self.workers.len())
    }
}

impl<M: Send + 'static> WorkerDeliver<M> for MultiCoordinator<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        if self.workers.iter().all(|worker| worker.is_closed()) && !self.workers.is_empty() {
            WorkerState::Closed
        } else if self.workers.iter().any(|worker| worker.state().is_active()) {
            WorkerState::Active
        } else {
            WorkerState::Idle
        }
    }

    fn wake(&self) -> bool {
        let wanted = self.wanted();
        let count = self.workers.len();
        let start = self.next.fetch_add(wanted, Ordering::Relaxed);

        let mut launched = false;
        for step in 0..wanted {
            launched |= self.workers[(start + step) % count].wake();
        }
        launched
    }

    fn wake_all(&self) -> bool {
        self.workers
            .iter()
            .fold(false, |launched, worker| worker.wake() | launched)
    }

    fn wake_all_and_wait(&self) {
        for worker in &self.workers {
            worker.wake_all_and_wait();
        }
    }

    fn run_as(&self, _outbox: &mut Outbox<M>, tail: Option<M>) -> Result<(), Option<M>> {
        Err(tail)
    }

    fn run_one(&self, _outbox: &mut Outbox<M>, tail: M) -> Result<(), M> {
        Err(tail)
    }

    fn shutdown(&self, mode: ShutdownMode) {
        for worker in &self.workers {
            worker.shutdown(mode);
        }
    }

    fn state_string(&self) -> String {
        let members: Vec<String> = self.workers.iter().map(|worker| worker.state_string()).collect();
        format!("{}[{}]", self.name, members.join(", "))
    }
}

impl<M> std::fmt::Debug for MultiCoordinator<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCoordinator")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("offset", &self.offset)
            .finish()
    }
}
