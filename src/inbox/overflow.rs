//! Reply overflow for a full inbox
//!
//! Replies must not block the thread that produces them. When the inbox
//! queue is full a reply is parked here instead, and a dedicated worker feeds
//! parked replies into the queue as space frees up. While anything is parked
//! later replies queue behind it, so replies keep their order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::InboxError;
use super::signal::InboxMessage;
use crate::deliver::{
    DeliverResult, Launcher, Outbox, QueueDeliver, RunImpl, ShutdownMode, Worker, WorkerDeliver,
};

/// How long one forwarding attempt waits for queue space.
const RETRY_WAIT: Duration = Duration::from_millis(100);

pub(crate) struct OverflowDrain<M> {
    service: String,
    target: QueueDeliver<M>,
    pending: Mutex<VecDeque<M>>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl<M: InboxMessage> OverflowDrain<M> {
    fn is_target_closed(&self) -> bool {
        let queue = self.target.queue();
        queue.is_write_closed() || queue.is_shutdown()
    }

    /// Moves one reply into the target queue, waiting for space as long as
    /// the drain is open. A closed drain or target fails the reply.
    fn forward(&self, mut msg: M) {
        loop {
            if self.closed.load(Ordering::Acquire) || self.is_target_closed() {
                msg.fail(InboxError::closed(&self.service));
                return;
            }

            match self.target.offer(msg, RETRY_WAIT) {
                Ok(()) => return,
                Err(back) => {
                    log::trace!("{}: reply overflow still waiting for space", self.service);
                    msg = back;
                }
            }
        }
    }
}

impl<M: InboxMessage> RunImpl<M> for OverflowDrain<M> {
    fn run_impl(&self, _outbox: &mut Outbox<M>, tail: Option<M>) -> DeliverResult<()> {
        if let Some(tail) = tail {
            self.pending.lock().push_back(tail);
        }

        let mut moved = 0usize;
        loop {
            let msg = {
                let mut pending = self.pending.lock();
                match pending.pop_front() {
                    Some(msg) => {
                        self.in_flight.fetch_add(1, Ordering::AcqRel);
                        msg
                    }
                    None => break,
                }
            };

            self.forward(msg);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            moved += 1;
        }

        if moved > 0 {
            log::trace!("{}: {} replies moved from overflow", self.service, moved);
            self.target.wake();
        }
        Ok(())
    }

    fn shutdown(&self, _mode: ShutdownMode) {
        self.closed.store(true, Ordering::Release);
    }
}

pub(crate) struct ReplyOverflow<M> {
    worker: Arc<Worker<M, OverflowDrain<M>>>,
}

impl<M: InboxMessage> ReplyOverflow<M> {
    pub(crate) fn new(service: &str, target: QueueDeliver<M>, launcher: Launcher) -> Self {
        let drain = OverflowDrain {
            service: service.to_string(),
            target,
            pending: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        log::debug!("{}: reply overflow started", service);
        Self {
            worker: Worker::new(format!("{}.overflow", service), drain, launcher, None),
        }
    }

    /// Whether replies are parked or being forwarded.
    pub(crate) fn is_active(&self) -> bool {
        let drain = self.worker.runner();
        drain.in_flight.load(Ordering::Acquire) > 0 || !drain.pending.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.worker.runner().pending.lock().len()
    }

    pub(crate) fn offer(&self, msg: M) {
        self.worker.runner().pending.lock().push_back(msg);
        self.worker.wake();
    }

    /// Stops forwarding and fails everything still parked.
    pub(crate) fn shutdown(&self) {
        self.worker.shutdown(ShutdownMode::Immediate);

        let drain = self.worker.runner();
        let parked: Vec<M> = drain.pending.lock().drain(..).collect();
        if !parked.is_empty() {
            log::debug!("{}: {} parked replies dropped at shutdown", drain.service, parked.len());
        }
        for msg in parked {
            msg.fail(InboxError::closed(&drain.service));
        }
    }
}
