//! Inbox: a queue, its worker and a lifecycle
//!
//! An inbox starts lazily on its first offer. Lifecycle signals go through
//! the same queue as messages, so the handler observes init, replay, active
//! and shutdown in order with its traffic.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::error::{InboxError, InboxResult};
use super::full::QueueFullHandler;
use super::lifecycle::{LifecycleGate, LifecycleState};
use super::overflow::ReplyOverflow;
use super::signal::{InboxMessage, InboxSignal, Latch};
use crate::deliver::{Launcher, QueueDeliver, ShutdownMode, WorkerRef};

pub(crate) struct InboxSettings {
    pub name: String,
    pub journal: bool,
    pub send_timeout: Duration,
    pub init_timeout: Duration,
    pub shutdown_wait: Duration,
    /// Handlers that each see every lifecycle signal: one, or every pipeline stage.
    pub signal_handlers: usize,
}

pub struct Inbox<M> {
    settings: InboxSettings,
    queue: QueueDeliver<M>,
    gate: Arc<LifecycleGate>,
    full_handler: Arc<dyn QueueFullHandler<M>>,
    launcher: Launcher,
    overflow: Mutex<Option<Arc<ReplyOverflow<M>>>>,
    this: Weak<Self>,
}

impl<M> Inbox<M> {
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn state(&self) -> LifecycleState {
        self.gate.state()
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_after_stopping()
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn queue(&self) -> &QueueDeliver<M> {
        &self.queue
    }

    pub fn send_timeout(&self) -> Duration {
        self.settings.send_timeout
    }

    pub fn wake(&self) -> bool {
        self.queue.wake()
    }

    pub fn wake_all(&self) -> bool {
        self.queue.wake_all()
    }

    pub fn wake_all_and_wait(&self) {
        self.queue.wake_all_and_wait()
    }
}

impl<M: InboxMessage> Inbox<M> {
    pub(crate) fn new(
        settings: InboxSettings,
        queue: QueueDeliver<M>,
        gate: Arc<LifecycleGate>,
        full_handler: Arc<dyn QueueFullHandler<M>>,
        launcher: Launcher,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            settings,
            queue,
            gate,
            full_handler,
            launcher,
            overflow: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Queues the init signals and wakes the worker.
    ///
    /// Only the first call does anything; returns whether it was this one.
    pub fn start(&self) -> bool {
        if !self.gate.to_init() {
            return false;
        }

        log::debug!("{}: initializing", self.name());
        self.enqueue_signal(InboxSignal::Init);
        if self.settings.journal {
            self.enqueue_signal(InboxSignal::Replay);
        } else {
            self.enqueue_signal(InboxSignal::Active);
            self.gate.to_active();
        }
        self.queue.wake();
        true
    }

    /// Worker draining this inbox.
    ///
    /// Starts the inbox first, so a direct delivery through the worker never
    /// overtakes the init signals.
    pub fn worker(&self) -> WorkerRef<M> {
        if self.gate.state() == LifecycleState::Uninit {
            self.start();
        }
        self.queue.worker().clone()
    }

    /// Starts the inbox if needed and waits for it to become active.
    pub fn init(&self) -> InboxResult<()> {
        if self.gate.is_after_stopping() {
            return Err(InboxError::closed(self.name()));
        }

        self.start();
        if self.gate.wait_for_active(self.settings.init_timeout) {
            Ok(())
        } else {
            Err(InboxError::InitTimeout {
                service: self.name().to_string(),
                waited_ms: self.settings.init_timeout.as_millis(),
            })
        }
    }

    /// Queues `msg` without waking the worker.
    ///
    /// Waits at most `timeout`, capped by the inbox send timeout. A rejected
    /// message goes to the queue-full handler and `false` is returned. A
    /// closed inbox fails the message and reports it as handled.
    pub fn offer(&self, msg: M, timeout: Duration) -> bool {
        if self.gate.is_after_stopping() {
            msg.fail(InboxError::closed(self.name()));
            return true;
        }

        if self.gate.state() == LifecycleState::Uninit {
            self.start();
        }

        let timeout = timeout.min(self.settings.send_timeout);
        match self.queue.offer(msg, timeout) {
            Ok(()) => true,
            Err(msg) => {
                self.full_handler
                    .on_queue_full(self.name(), self.queue.size(), timeout, msg);
                false
            }
        }
    }

    pub fn offer_and_wake(&self, msg: M) -> bool {
        let queued = self.offer(msg, self.settings.send_timeout);
        self.queue.wake();
        queued
    }

    /// Queues a reply without ever blocking the caller.
    ///
    /// Replies that do not fit go to the overflow queue; once it holds
    /// anything, later replies follow them there. Returns `false` when the
    /// inbox is closed and the reply was failed instead.
    pub fn offer_result(&self, msg: M) -> bool {
        if self.gate.is_after_stopping() {
            msg.fail(InboxError::closed(self.name()));
            return false;
        }

        if self.gate.state() == LifecycleState::Uninit {
            self.start();
        }

        let mut overflow = self.overflow.lock();
        if let Some(active) = overflow.as_ref().filter(|overflow| overflow.is_active()) {
            active.offer(msg);
            return true;
        }

        match self.queue.offer(msg, Duration::ZERO) {
            Ok(()) => {
                drop(overflow);
                self.queue.wake();
            }
            Err(msg) => {
                let target = overflow
                    .get_or_insert_with(|| {
                        Arc::new(ReplyOverflow::new(
                            self.name(),
                            self.queue.clone(),
                            self.launcher.clone(),
                        ))
                    })
                    .clone();
                drop(overflow);
                target.offer(msg);
            }
        }
        true
    }

    /// Number of replies parked in the overflow queue.
    pub fn overflow_len(&self) -> usize {
        self.overflow.lock().as_ref().map_or(0, |overflow| overflow.len())
    }

    /// Stops the inbox.
    ///
    /// A graceful stop queues a shutdown signal behind the pending messages
    /// and waits up to the shutdown wait for the handler to reach it. When
    /// called from the inbox's own handler the wait runs out instead. An
    /// immediate stop closes the worker at once; a run already in progress
    /// fails the messages it still drains, the rest stay in the closed ring.
    /// Messages accepted before a graceful stop are delivered even when the
    /// wait runs out.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let started = self.gate.state() != LifecycleState::Uninit;
        if !self.gate.to_stopping() {
            return;
        }
        log::debug!("{}: stopping ({})", self.name(), mode);

        if let Some(overflow) = self.overflow.lock().take() {
            overflow.shutdown();
        }

        if started && mode == ShutdownMode::Graceful {
            self.await_handler_shutdown(mode);
        } else {
            self.gate.abandon();
        }

        self.gate.to_destroy();
        self.queue.queue().close_write();
        self.queue.shutdown(mode);

        let left = self.queue.size();
        if left > 0 {
            log::debug!("{}: stopped with {} entries left in queue", self.name(), left);
        } else {
            log::debug!("{}: stopped", self.name());
        }
    }

    fn await_handler_shutdown(&self, mode: ShutdownMode) {
        let done = Latch::with_count(self.settings.signal_handlers);
        let signal = M::signal(&self.this, InboxSignal::Shutdown { mode, done: done.clone() });

        if self.queue.offer(signal, self.settings.shutdown_wait).is_err() {
            log::warn!("{}: shutdown signal not queued, queue full", self.name());
            return;
        }

        self.queue.wake_all();
        if !done.wait(self.settings.shutdown_wait) {
            log::debug!(
                "{}: handler did not reach shutdown within {:?}",
                self.name(),
                self.settings.shutdown_wait
            );
        }
    }

    fn enqueue_signal(&self, signal: InboxSignal) {
        let msg = M::signal(&self.this, signal);
        if self.queue.offer(msg, self.settings.send_timeout).is_err() {
            log::warn!("{}: lifecycle signal not queued, queue full", self.name());
        }
    }
}

impl<M> std::fmt::Debug for Inbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("name", &self.settings.name)
            .field("state", &self.gate.state())
            .field("size", &self.queue.size())
            .field("worker", &self.queue.worker().state_string())
            .finish()
    }
}
