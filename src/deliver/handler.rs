//! Delivery handler and message capabilities

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DeliverResult;
use super::outbox::Outbox;
use super::worker::WorkerRef;

/// How a worker or inbox should stop.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ShutdownMode {
    /// Let the current run finish draining; callers stop enqueueing first.
    #[default]
    Graceful,
    /// Close the worker now; later wakes and starts are refused.
    Immediate,
}

/// Consumer of messages drained from a queue.
///
/// Only `deliver` is required. The batch hooks bracket every drain, so a
/// handler can buffer output per message and flush it once per batch.
pub trait Deliver<M>: Send {
    fn deliver(&mut self, msg: M, outbox: &mut Outbox<M>) -> DeliverResult<()>;

    fn before_batch(&mut self) {}

    fn after_batch(&mut self) -> DeliverResult<()> {
        Ok(())
    }

    fn on_init(&mut self) {}

    fn on_active(&mut self) {}

    /// Replays a journal before the owning inbox becomes active.
    fn replay(&mut self, _outbox: &mut Outbox<M>) -> DeliverResult<()> {
        Ok(())
    }

    fn shutdown(&mut self, _mode: ShutdownMode) {}

    /// Debug name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<M, D: Deliver<M> + ?Sized> Deliver<M> for Box<D> {
    fn deliver(&mut self, msg: M, outbox: &mut Outbox<M>) -> DeliverResult<()> {
        (**self).deliver(msg, outbox)
    }

    fn before_batch(&mut self) {
        (**self).before_batch()
    }

    fn after_batch(&mut self) -> DeliverResult<()> {
        (**self).after_batch()
    }

    fn on_init(&mut self) {
        (**self).on_init()
    }

    fn on_active(&mut self) {
        (**self).on_active()
    }

    fn replay(&mut self, outbox: &mut Outbox<M>) -> DeliverResult<()> {
        (**self).replay(outbox)
    }

    fn shutdown(&mut self, mode: ShutdownMode) {
        (**self).shutdown(mode)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A message that knows where it belongs.
///
/// The outbox needs two things from a message: to put it back on its own
/// queue, and to find the worker that drains that queue.
pub trait Message: Send + Sized + 'static {
    /// Places the message on its owning queue, waiting up to `timeout`.
    fn offer_queue(self, timeout: Duration) -> bool;

    /// Worker draining the owning queue.
    fn worker(&self) -> WorkerRef<Self>;
}

pub(crate) fn begin_batch<M>(handler: &mut dyn Deliver<M>) {
    handler.before_batch();
}

pub(crate) fn end_batch<M>(handler: &mut dyn Deliver<M>) {
    if let Err(err) = handler.after_batch() {
        log::debug!("{}: after-batch hook failed: {}", handler.name(), err);
    }
}

/// Hands one message to the handler; failures and panics are logged, never propagated.
pub(crate) fn deliver_one<M>(handler: &mut dyn Deliver<M>, msg: M, outbox: &mut Outbox<M>) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.deliver(msg, outbox))) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            log::debug!("{}: delivery failed: {}", handler.name(), err);
            false
        }
        Err(payload) => {
            log::debug!(
                "{}: delivery panicked: {}",
                handler.name(),
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
