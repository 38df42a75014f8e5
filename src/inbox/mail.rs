//! Ready-made envelope for inbox traffic

use std::sync::{Arc, Weak};
use std::time::Duration;

use super::inbox::Inbox;
use super::signal::{InboxMessage, InboxSignal};
use crate::deliver::{Message, NullWorker, WorkerRef};

/// A payload addressed to an inbox, or one of that inbox's lifecycle signals.
pub enum Mail<T> {
    Signal {
        to: Weak<Inbox<Mail<T>>>,
        signal: InboxSignal,
    },
    Post {
        to: Weak<Inbox<Mail<T>>>,
        body: T,
    },
}

impl<T> Mail<T> {
    pub fn post(to: &Arc<Inbox<Mail<T>>>, body: T) -> Self {
        Mail::Post {
            to: Arc::downgrade(to),
            body,
        }
    }

    pub fn to(&self) -> &Weak<Inbox<Mail<T>>> {
        match self {
            Mail::Signal { to, .. } | Mail::Post { to, .. } => to,
        }
    }

    pub fn body(&self) -> Option<&T> {
        match self {
            Mail::Post { body, .. } => Some(body),
            Mail::Signal { .. } => None,
        }
    }

    pub fn into_body(self) -> Option<T> {
        match self {
            Mail::Post { body, .. } => Some(body),
            Mail::Signal { .. } => None,
        }
    }
}

impl<T: Clone> Clone for Mail<T> {
    fn clone(&self) -> Self {
        match self {
            Mail::Signal { to, signal } => Mail::Signal {
                to: to.clone(),
                signal: signal.clone(),
            },
            Mail::Post { to, body } => Mail::Post {
                to: to.clone(),
                body: body.clone(),
            },
        }
    }
}

impl<T> std::fmt::Debug for Mail<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let to = self.to().upgrade();
        let name = to.as_ref().map_or("<dropped>", |inbox| inbox.name());
        match self {
            Mail::Signal { signal, .. } => write!(f, "Mail::Signal({:?} -> {})", signal, name),
            Mail::Post { .. } => write!(f, "Mail::Post(-> {})", name),
        }
    }
}

impl<T: Send + 'static> Message for Mail<T> {
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

impl<T: Send + 'static> InboxMessage for Mail<T> {
    fn signal(inbox: &Weak<Inbox<Self>>, signal: InboxSignal) -> Self {
        Mail::Signal {
            to: inbox.clone(),
            signal,
        }
    }

    fn into_signal(self) -> Result<InboxSignal, Self> {
        match self {
            Mail::Signal { signal, .. } => Ok(signal),
            post => Err(post),
        }
    }

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}
