//! Inbox lifecycle gate
//!
//! ```text
//! Uninit -> Initializing -> Active -> Stopping -> Destroyed
//! ```
//!
//! Every step only moves forward. Callers that must not run before the inbox
//! is active block in [`LifecycleGate::wait_for_active`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum LifecycleState {
    Uninit = 0,
    Initializing = 1,
    Active = 2,
    Stopping = 3,
    Destroyed = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Uninit,
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Active,
            3 => LifecycleState::Stopping,
            _ => LifecycleState::Destroyed,
        }
    }
}

#[derive(Debug)]
pub struct LifecycleGate {
    state: AtomicU8,
    abandoned: AtomicBool,
    lock: Mutex<()>,
    changed: Condvar,
}

impl LifecycleGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninit as u8),
            abandoned: AtomicBool::new(false),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Claims initialization. Only the first caller gets `true`.
    pub fn to_init(&self) -> bool {
        self.advance_from(LifecycleState::Uninit, LifecycleState::Initializing)
    }

    /// Marks the inbox active unless it is already stopping.
    pub fn to_active(&self) -> bool {
        self.advance_below(LifecycleState::Active)
    }

    /// Begins stopping. Returns `false` when a stop is already under way.
    pub fn to_stopping(&self) -> bool {
        self.advance_below(LifecycleState::Stopping)
    }

    pub fn to_destroy(&self) -> bool {
        self.advance_below(LifecycleState::Destroyed)
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    pub fn is_after_init(&self) -> bool {
        self.state() >= LifecycleState::Active
    }

    pub fn is_after_stopping(&self) -> bool {
        self.state() >= LifecycleState::Stopping
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    /// Marks queued work as forfeit: handlers fail what they still drain.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Waits until the gate has passed initialization.
    ///
    /// Returns `true` when the gate is active or later.
    pub fn wait_for_active(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.lock.lock();
        while !self.is_after_init() {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut guard, deadline).timed_out() {
                        return self.is_after_init();
                    }
                }
                None => self.changed.wait(&mut guard),
            }
        }
        true
    }

    fn advance_from(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            self.notify();
        }
        moved
    }

    // moves to `to` from any earlier state
    fn advance_below(&self, to: LifecycleState) -> bool {
        let moved = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            })
            .is_ok();
        if moved {
            self.notify();
        }
        moved
    }

    fn notify(&self) {
        let _guard = self.lock.lock();
        self.changed.notify_all();
    }
}

impl Default for LifecycleGate {
    fn default() -> Self {
        Self::new()
    }
}
