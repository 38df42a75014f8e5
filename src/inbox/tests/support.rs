//! Fixtures shared by the inbox tests

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::deliver::{Deliver, DeliverError, DeliverResult, Message, NullWorker, Outbox, ShutdownMode, WorkerRef};
use crate::inbox::{Inbox, InboxError, InboxMessage, InboxSignal, Latch, Mail, QueueFullHandler};

/// Ordered record of what a [`Tally`] handler saw.
#[derive(Debug, Default)]
pub struct Events {
    log: Mutex<Vec<String>>,
}

impl Events {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: impl Into<String>) {
        self.log.lock().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.log.lock().iter().filter(|seen| *seen == event).count()
    }

    /// Ids of delivered messages, in delivery order.
    pub fn ids(&self) -> Vec<u32> {
        self.log
            .lock()
            .iter()
            .filter_map(|event| event.strip_prefix("msg:"))
            .filter_map(|id| id.parse().ok())
            .collect()
    }
}

/// Messages a [`Tally`] can record.
pub trait Tallied {
    fn id(&self) -> u32;
}

impl Tallied for Mail<u32> {
    fn id(&self) -> u32 {
        self.body().copied().unwrap_or(u32::MAX)
    }
}

/// Handler that logs lifecycle hooks and message ids into [`Events`].
pub struct Tally {
    events: Arc<Events>,
    hold: Option<Latch>,
    pace: Option<Duration>,
    fail_replay: bool,
    record_context: bool,
}

impl Tally {
    pub fn new(events: &Arc<Events>) -> Self {
        Self {
            events: events.clone(),
            hold: None,
            pace: None,
            fail_replay: false,
            record_context: false,
        }
    }

    /// Blocks every delivery until `latch` is released.
    pub fn holding(mut self, latch: &Latch) -> Self {
        self.hold = Some(latch.clone());
        self
    }

    /// Sleeps `pace` after every delivery.
    pub fn pacing(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn failing_replay(mut self) -> Self {
        self.fail_replay = true;
        self
    }

    pub fn recording_context(mut self) -> Self {
        self.record_context = true;
        self
    }

    pub fn boxed<M: Tallied + 'static>(self) -> Box<dyn Deliver<M>> {
        Box::new(self)
    }
}

impl<M: Tallied> Deliver<M> for Tally {
    fn deliver(&mut self, msg: M, outbox: &mut Outbox<M>) -> DeliverResult<()> {
        self.events.push(format!("msg:{}", msg.id()));
        if self.record_context {
            if let Some(name) = outbox.context_as::<String>() {
                self.events.push(format!("ctx:{}", name));
            }
        }
        if let Some(hold) = &self.hold {
            hold.wait(Duration::from_secs(5));
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        Ok(())
    }

    fn on_init(&mut self) {
        self.events.push("init");
    }

    fn on_active(&mut self) {
        self.events.push("active");
    }

    fn replay(&mut self, _outbox: &mut Outbox<M>) -> DeliverResult<()> {
        self.events.push("replay");
        if self.fail_replay {
            return Err(DeliverError::handler("journal unreadable"));
        }
        Ok(())
    }

    fn shutdown(&mut self, mode: ShutdownMode) {
        self.events.push(format!("shutdown:{}", mode));
    }
}

/// Failures reported back to the sender of a [`Ticket`].
#[derive(Debug, Default)]
pub struct Failures {
    seen: Mutex<Vec<(u32, String)>>,
}

impl Failures {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.seen.lock().iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn messages(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(_, message)| message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

/// Message type whose failures are observable.
#[derive(Clone)]
pub enum Ticket {
    Signal(Weak<Inbox<Ticket>>, InboxSignal),
    Job {
        to: Weak<Inbox<Ticket>>,
        id: u32,
        failures: Arc<Failures>,
    },
}

impl Ticket {
    pub fn job(to: &Arc<Inbox<Ticket>>, id: u32, failures: &Arc<Failures>) -> Self {
        Ticket::Job {
            to: Arc::downgrade(to),
            id,
            failures: failures.clone(),
        }
    }

    fn to(&self) -> &Weak<Inbox<Ticket>> {
        match self {
            Ticket::Signal(to, _) | Ticket::Job { to, .. } => to,
        }
    }
}

impl Tallied for Ticket {
    fn id(&self) -> u32 {
        match self {
            Ticket::Job { id, .. } => *id,
            Ticket::Signal(..) => u32::MAX,
        }
    }
}

impl Message for Ticket {
    fn offer_queue(self, timeout: Duration) -> bool {
        match self.to().upgrade() {
            Some(inbox) => inbox.offer(self, timeout),
            None => false,
        }
    }

    fn worker(&self) -> WorkerRef<Self> {
        match self.to().upgrade() {
            Some(inbox) => inbox.worker(),
            None => Arc::new(NullWorker::new()),
        }
    }
}

impl InboxMessage for Ticket {
    fn signal(inbox: &Weak<Inbox<Self>>, signal: InboxSignal) -> Self {
        Ticket::Signal(inbox.clone(), signal)
    }

    fn into_signal(self) -> Result<InboxSignal, Self> {
        match self {
            Ticket::Signal(_, signal) => Ok(signal),
            job => Err(job),
        }
    }

    fn describe(&self) -> String {
        format!("ticket {}", self.id())
    }

    fn fail(self, error: InboxError) {
        if let Ticket::Job { id, failures, .. } = self {
            failures.seen.lock().push((id, error.to_string()));
        }
    }
}

/// Queue-full handler that keeps the rejected tickets' ids and queue sizes.
#[derive(Debug, Default)]
pub struct FullRecorder {
    pub seen: Mutex<Vec<(String, usize, u32)>>,
}

impl QueueFullHandler<Ticket> for FullRecorder {
    fn on_queue_full(&self, service: &str, size: usize, _timeout: Duration, message: Ticket) {
        self.seen.lock().push((service.to_string(), size, message.id()));
    }
}
