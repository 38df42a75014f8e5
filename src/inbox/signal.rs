//! Lifecycle signals carried through an inbox's own queue
//!
//! Init, replay and shutdown travel as ordinary queue entries, so a handler
//! sees them in order with the messages around them and on its own thread.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::error::InboxError;
use super::inbox::Inbox;
use crate::deliver::{Message, ShutdownMode};

/// Countdown a caller can wait on; open once every holder has released it.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Latch {
    /// Latch opened by a single release.
    pub fn new() -> Self {
        Self::with_count(1)
    }

    /// Latch opened after `count` releases.
    pub fn with_count(count: usize) -> Self {
        Self {
            inner: Arc::new((Mutex::new(count.max(1)), Condvar::new())),
        }
    }

    pub fn release(&self) {
        let (remaining, condvar) = &*self.inner;
        let mut remaining = remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            condvar.notify_all();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.inner.0.lock()
    }

    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns `true` if the latch opened within `timeout`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (remaining, condvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = remaining.lock();
        while *guard > 0 {
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(&mut guard, deadline).timed_out() {
                        return *guard == 0;
                    }
                }
                None => condvar.wait(&mut guard),
            }
        }
        true
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("remaining", &self.remaining()).finish()
    }
}

#[derive(Debug, Clone)]
pub enum InboxSignal {
    /// First entry of every inbox; runs the handler's `on_init`.
    Init,
    /// Replays the handler's journal, then activates the inbox.
    Replay,
    /// Runs the handler's `on_active`.
    Active,
    /// Stops the handler; each handler that sees it releases `done` once.
    Shutdown { mode: ShutdownMode, done: Latch },
}

/// Message type an [`Inbox`] can carry.
///
/// Besides routing, the inbox needs to wrap its own lifecycle signals in the
/// message type and to tell them apart again on the delivery side.
pub trait InboxMessage: Message {
    fn signal(inbox: &Weak<Inbox<Self>>, signal: InboxSignal) -> Self;

    /// Unwraps a lifecycle signal; ordinary messages come back unchanged.
    fn into_signal(self) -> Result<InboxSignal, Self>;

    /// Short description used in queue-full reports.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Called for a message the inbox could not accept.
    fn fail(self, error: InboxError) {
        log::debug!("message dropped: {}", error);
    }
}
