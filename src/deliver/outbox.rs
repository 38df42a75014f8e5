//! Per-thread staging slot for outgoing messages
//!
//! A delivery that sends a message does not push it straight onto the target
//! queue. The outbox keeps the newest message local and only pushes the one
//! it replaces, so a chain of sends from one thread ends with a single held
//! message that can often be delivered inline instead of through a thread
//! hand-off.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use super::handler::Message;
use super::worker::same_worker;

/// Wait applied when a held message is pushed back onto its own queue.
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque marker for the component currently running on this outbox.
pub type OutboxContext = Arc<dyn Any + Send + Sync>;

pub struct Outbox<M> {
    message: Option<M>,
    context: Option<OutboxContext>,
    offer_timeout: Duration,
}

impl<M> Outbox<M> {
    pub fn new() -> Self {
        Self::with_offer_timeout(DEFAULT_OFFER_TIMEOUT)
    }

    pub fn with_offer_timeout(offer_timeout: Duration) -> Self {
        Self {
            message: None,
            context: None,
            offer_timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none()
    }

    pub fn context(&self) -> Option<&OutboxContext> {
        self.context.as_ref()
    }

    /// Current context, if it is a `T`.
    pub fn context_as<T: Any>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|context| context.downcast_ref::<T>())
    }

    /// Installs a new context, returning the previous one for restoring later.
    pub fn get_and_set_context(&mut self, context: Option<OutboxContext>) -> Option<OutboxContext> {
        std::mem::replace(&mut self.context, context)
    }
}

impl<M> Default for Outbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Outbox<M> {
    /// Holds `msg`, pushing any previously held message onto its own queue.
    ///
    /// The previous message's worker is woken only when it differs from the
    /// new message's worker; otherwise the later flush of `msg` covers it.
    pub fn offer(&mut self, msg: M) {
        let Some(previous) = self.message.take() else {
            self.message = Some(msg);
            return;
        };

        let previous_worker = previous.worker();
        let same = same_worker(&previous_worker, &msg.worker());
        self.message = Some(msg);

        if !previous.offer_queue(self.offer_timeout) {
            log::warn!(
                "outbox: message for {} not queued within {:?}",
                previous_worker.name(),
                self.offer_timeout
            );
        }

        if !same {
            previous_worker.wake();
        }
    }

    /// Pushes the held message onto its queue and wakes its worker.
    pub fn flush(&mut self) {
        if let Some(msg) = self.message.take() {
            Self::push(msg, self.offer_timeout);
        }
    }

    /// Runs the held message inline when its worker allows it, otherwise flushes.
    ///
    /// Returns `true` when the outbox holds more work afterwards, since an
    /// inline delivery can itself offer new messages.
    pub fn flush_and_execute_last(&mut self) -> bool {
        let Some(msg) = self.message.take() else {
            return false;
        };

        let worker = msg.worker();
        if let Err(msg) = worker.run_one(self, msg) {
            Self::push(msg, self.offer_timeout);
        }

        !self.is_empty()
    }

    /// Drains the whole causal chain of sends held by this outbox.
    pub fn flush_and_execute_all(&mut self) {
        while self.flush_and_execute_last() {}
    }

    fn push(msg: M, timeout: Duration) {
        let worker = msg.worker();
        if !msg.offer_queue(timeout) {
            log::warn!(
                "outbox: message for {} not queued within {:?}",
                worker.name(),
                timeout
            );
        }
        worker.wake();
    }
}

impl<M> std::fmt::Debug for Outbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("held", &self.message.is_some())
            .field("context", &self.context.is_some())
            .finish()
    }
}
