//! Inbox construction

use std::sync::Arc;
use std::time::Duration;

use super::adapter::InboxDeliver;
use super::error::InboxResult;
use super::full::{QueueFullHandler, QueueFullPolicy};
use super::inbox::{Inbox, InboxSettings};
use super::lifecycle::LifecycleGate;
use super::signal::InboxMessage;
use crate::core::config::{CourierConfig, InboxConfig, QueueFullConfig};
use crate::deliver::{Deliver, Executor, QueueDeliver, QueueDeliverBuilder};

/// Builds an [`Inbox`] around one of the worker shapes.
///
/// ```no_run
/// use courier::deliver::{Deliver, DeliverResult, Outbox};
/// use courier::inbox::{InboxBuilder, Mail};
///
/// struct Print;
///
/// impl Deliver<Mail<String>> for Print {
///     fn deliver(&mut self, msg: Mail<String>, _outbox: &mut Outbox<Mail<String>>) -> DeliverResult<()> {
///         println!("{:?}", msg.body());
///         Ok(())
///     }
/// }
///
/// let inbox = InboxBuilder::new("printer").build(Box::new(Print)).unwrap();
/// inbox.offer_and_wake(Mail::post(&inbox, "hello".to_string()));
/// ```
pub struct InboxBuilder<M> {
    name: String,
    queue: QueueDeliverBuilder,
    inbox: InboxConfig,
    journal: bool,
    full_handler: Option<Arc<dyn QueueFullHandler<M>>>,
    full_config: QueueFullConfig,
}

impl<M: InboxMessage> InboxBuilder<M> {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            queue: QueueDeliverBuilder::new(name.clone()),
            name,
            inbox: InboxConfig::default(),
            journal: false,
            full_handler: None,
            full_config: QueueFullConfig::default(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CourierConfig) -> Self {
        let name = name.into();
        Self {
            queue: QueueDeliverBuilder::from_config(name.clone(), &config.queue),
            name,
            inbox: config.inbox.clone(),
            journal: false,
            full_handler: None,
            full_config: config.queue_full.clone(),
        }
    }

    /// Replaces the queue settings.
    pub fn queue(mut self, queue: QueueDeliverBuilder) -> Self {
        self.queue = queue;
        self
    }

    /// Adjusts the queue settings in place.
    pub fn with_queue(mut self, configure: impl FnOnce(QueueDeliverBuilder) -> QueueDeliverBuilder) -> Self {
        self.queue = configure(self.queue);
        self
    }

    pub fn executor(self, executor: Arc<dyn Executor>) -> Self {
        self.with_queue(|queue| queue.executor(executor))
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.inbox.send_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.inbox.init_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn shutdown_wait(mut self, wait: Duration) -> Self {
        self.inbox.shutdown_wait_ms = duration_ms(wait);
        self
    }

    /// Replays the handler's journal before the inbox becomes active.
    pub fn journal(mut self, journal: bool) -> Self {
        self.journal = journal;
        self
    }

    pub fn full_handler(mut self, handler: Arc<dyn QueueFullHandler<M>>) -> Self {
        self.full_handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(self, deliver: Box<dyn Deliver<M>>) -> InboxResult<Arc<Inbox<M>>> {
        let gate = Arc::new(LifecycleGate::new());
        let queue_builder = self.queue_builder();
        let queue = queue_builder.build(InboxDeliver::wrap(deliver, gate.clone(), &self.name))?;
        self.finish(queue_builder, queue, gate, 1)
    }

    /// Several handlers racing on one queue.
    ///
    /// Lifecycle signals reach whichever handler polls them, so only one
    /// handler sees each of them.
    pub fn build_multi<F>(self, mut factory: F, count: usize) -> InboxResult<Arc<Inbox<M>>>
    where
        F: FnMut(usize) -> Box<dyn Deliver<M>>,
    {
        let gate = Arc::new(LifecycleGate::new());
        let queue_builder = self.queue_builder().multiworker(true);
        let name = self.name.clone();
        let wrap_gate = gate.clone();
        let queue = queue_builder.build_multi(
            |index| InboxDeliver::wrap(factory(index), wrap_gate.clone(), &name),
            count,
        )?;
        self.finish(queue_builder, queue, gate, 1)
    }

    /// Pipeline of handlers; every stage sees every message and signal.
    pub fn disruptor(self, handlers: Vec<Box<dyn Deliver<M>>>) -> InboxResult<Arc<Inbox<M>>>
    where
        M: Clone,
    {
        let gate = Arc::new(LifecycleGate::new());
        let queue_builder = self.queue_builder();
        let stages = handlers.len();
        let handlers = handlers
            .into_iter()
            .map(|handler| InboxDeliver::wrap(handler, gate.clone(), &self.name))
            .collect();
        let queue = queue_builder.disruptor(handlers)?;
        self.finish(queue_builder, queue, gate, stages)
    }

    fn queue_builder(&self) -> QueueDeliverBuilder {
        self.queue.clone().context(Arc::new(self.name.clone()))
    }

    fn finish(
        self,
        queue_builder: QueueDeliverBuilder,
        queue: QueueDeliver<M>,
        gate: Arc<LifecycleGate>,
        signal_handlers: usize,
    ) -> InboxResult<Arc<Inbox<M>>> {
        let launcher = queue_builder.launcher()?;
        let full_handler = match self.full_handler {
            Some(handler) => handler,
            None => Arc::new(QueueFullPolicy::new(self.full_config)),
        };

        let settings = InboxSettings {
            name: self.name,
            journal: self.journal,
            send_timeout: self.inbox.send_timeout(),
            init_timeout: self.inbox.init_timeout(),
            shutdown_wait: self.inbox.shutdown_wait(),
            signal_handlers,
        };
        log::debug!("{}: inbox built over {:?}", settings.name, queue);
        Ok(Inbox::new(settings, queue, gate, full_handler, launcher))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl<M> std::fmt::Debug for InboxBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxBuilder")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("inbox", &self.inbox)
            .field("journal", &self.journal)
            .finish()
    }
}
