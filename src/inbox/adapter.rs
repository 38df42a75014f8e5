//! Handler wrapper that interprets inbox lifecycle signals

use std::sync::Arc;

use super::error::InboxError;
use super::lifecycle::LifecycleGate;
use super::signal::{InboxMessage, InboxSignal};
use crate::deliver::{Deliver, DeliverResult, Outbox, ShutdownMode};

pub(crate) struct InboxDeliver<M> {
    inner: Box<dyn Deliver<M>>,
    gate: Arc<LifecycleGate>,
    service: String,
    stopped: bool,
}

impl<M: InboxMessage> InboxDeliver<M> {
    pub(crate) fn wrap(inner: Box<dyn Deliver<M>>, gate: Arc<LifecycleGate>, service: &str) -> Box<dyn Deliver<M>> {
        Box::new(Self {
            inner,
            gate,
            service: service.to_string(),
            stopped: false,
        })
    }

    fn on_signal(&mut self, signal: InboxSignal, outbox: &mut Outbox<M>) {
        match signal {
            InboxSignal::Init => {
                log::debug!("{}: init", self.service);
                self.inner.on_init();
            }
            InboxSignal::Replay => {
                if let Err(err) = self.inner.replay(outbox) {
                    log::warn!("{}: journal replay failed: {}", self.service, err);
                }
                self.activate();
            }
            InboxSignal::Active => self.activate(),
            InboxSignal::Shutdown { mode, done } => {
                self.stop(mode);
                done.release();
            }
        }
    }

    fn activate(&mut self) {
        if self.gate.to_active() {
            log::debug!("{}: active", self.service);
        }
        self.inner.on_active();
    }

    fn stop(&mut self, mode: ShutdownMode) {
        if !self.stopped {
            self.stopped = true;
            self.inner.shutdown(mode);
        }
    }
}

impl<M: InboxMessage> Deliver<M> for InboxDeliver<M> {
    fn deliver(&mut self, msg: M, outbox: &mut Outbox<M>) -> DeliverResult<()> {
        match msg.into_signal() {
            Ok(signal) => {
                self.on_signal(signal, outbox);
                Ok(())
            }
            Err(msg) if self.stopped || self.gate.is_abandoned() => {
                msg.fail(InboxError::closed(&self.service));
                Ok(())
            }
            Err(msg) => self.inner.deliver(msg, outbox),
        }
    }

    fn before_batch(&mut self) {
        self.inner.before_batch();
    }

    fn after_batch(&mut self) -> DeliverResult<()> {
        self.inner.after_batch()
    }

    fn shutdown(&mut self, mode: ShutdownMode) {
        self.stop(mode);
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
