use std::sync::atomic::{AtomicUsize, Ordering};

use crate::deliver::{
    Deliver, DeliverError, DeliverResult, Outbox, ShutdownMode, WorkerDeliver, WorkerState,
};

/// Handler that keeps what it was given.
#[derive(Debug, Default)]
pub struct Collect {
    pub seen: Vec<u32>,
    pub before: usize,
    pub after: usize,
    pub fail_even: bool,
    pub panic_on: Option<u32>,
}

impl Deliver<u32> for Collect {
    fn deliver(&mut self, msg: u32, _outbox: &mut Outbox<u32>) -> DeliverResult<()> {
        self.seen.push(msg);
        if self.panic_on == Some(msg) {
            panic!("value {} panicked", msg);
        }
        if self.fail_even && msg % 2 == 0 {
            return Err(DeliverError::handler(format!("value {} rejected", msg)));
        }
        Ok(())
    }

    fn before_batch(&mut self) {
        self.before += 1;
    }

    fn after_batch(&mut self) -> DeliverResult<()> {
        self.after += 1;
        Ok(())
    }
}

/// Stand-in for the next pipeline stage; only counts wakes.
#[derive(Debug, Default)]
pub struct WakeCounter {
    pub wakes: AtomicUsize,
}

impl WakeCounter {
    pub fn count(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl WorkerDeliver<u32> for WakeCounter {
    fn name(&self) -> &str {
        "wake-counter"
    }

    fn state(&self) -> WorkerState {
        WorkerState::Idle
    }

    fn wake(&self) -> bool {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn wake_all_and_wait(&self) {}

    fn run_as(&self, _outbox: &mut Outbox<u32>, tail: Option<u32>) -> Result<(), Option<u32>> {
        Err(tail)
    }

    fn run_one(&self, _outbox: &mut Outbox<u32>, tail: u32) -> Result<(), u32> {
        Err(tail)
    }

    fn shutdown(&self, _mode: ShutdownMode) {}
}
