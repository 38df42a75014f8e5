//! Worker run-state machine
//!
//! Every worker owns one atomic state cell. The right to run a worker's
//! delivery loop is taken and released only by compare-and-exchange on that
//! cell; no lock is involved.
//!
//! ```text
//!            wake                      finish (no wake seen)
//!   IDLE ───────────▶ ACTIVE_WAKE       ACTIVE ───────────▶ IDLE
//!     │ start                ▲             │
//!     └──────▶ ACTIVE ───────┘ wake/start  │ resume
//!                     ◀────────────────────┘ (from ACTIVE_WAKE)
//!
//!   close: any ──▶ CLOSED (terminal, absorbs every event)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use super::error::{DeliverError, DeliverResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Active = 1,
    ActiveWake = 2,
    Closed = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerEvent {
    /// New work arrived.
    Wake,
    /// A caller wants to run the loop on its own thread.
    Start,
    /// The loop found nothing more to do.
    Finish,
    /// The loop is about to drain again after seeing a wake.
    Resume,
    Close,
}

impl WorkerState {
    /// Exhaustive transition table.
    pub fn on(self, event: WorkerEvent) -> DeliverResult<WorkerState> {
        use WorkerEvent::*;

        let next = match (self, event) {
            (_, Close) => WorkerState::Closed,
            (WorkerState::Closed, _) => WorkerState::Closed,
            (_, Resume) => WorkerState::Active,
            (WorkerState::ActiveWake, _) => WorkerState::ActiveWake,
            (WorkerState::Idle, Wake) => WorkerState::ActiveWake,
            (WorkerState::Idle, Start) => WorkerState::Active,
            (WorkerState::Idle, Finish) => {
                return Err(DeliverError::IllegalTransition {
                    state: self.to_string(),
                    event: event.to_string(),
                })
            }
            (WorkerState::Active, Wake | Start) => WorkerState::ActiveWake,
            (WorkerState::Active, Finish) => WorkerState::Idle,
        };

        Ok(next)
    }

    pub fn is_idle(self) -> bool {
        self == WorkerState::Idle
    }

    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Active | WorkerState::ActiveWake)
    }

    pub fn is_closed(self) -> bool {
        self == WorkerState::Closed
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Active,
            2 => WorkerState::ActiveWake,
            _ => WorkerState::Closed,
        }
    }
}

/// Outcome of applying one event to the state cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: WorkerState,
    pub next: WorkerState,
}

impl Transition {
    /// The event moved an idle worker into a run: somebody must execute it.
    pub fn claimed_run(self) -> bool {
        self.previous.is_idle() && self.next.is_active()
    }
}

pub struct AtomicWorkerState {
    cell: AtomicU8,
}

impl AtomicWorkerState {
    pub fn new(state: WorkerState) -> Self {
        Self {
            cell: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.cell.load(Ordering::Acquire))
    }

    /// Applies `event` with a compare-exchange loop.
    pub fn apply(&self, event: WorkerEvent) -> DeliverResult<Transition> {
        let mut current = self.load();

        loop {
            let next = current.on(event)?;
            if next == current {
                return Ok(Transition {
                    previous: current,
                    next,
                });
            }

            match self.cell.compare_exchange_weak(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(Transition {
                        previous: current,
                        next,
                    })
                }
                Err(actual) => current = WorkerState::from_u8(actual),
            }
        }
    }

    pub fn compare_exchange(&self, current: WorkerState, next: WorkerState) -> bool {
        self.cell
            .compare_exchange(current as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for AtomicWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.load())
    }
}
