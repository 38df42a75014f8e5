use std::marker::PhantomData;

use super::handler::ShutdownMode;
use super::outbox::Outbox;
use super::state::WorkerState;
use super::worker::WorkerDeliver;

/// Worker that never runs anything.
///
/// Stands in where a queue exists without a consumer; wakes are ignored and
/// direct runs hand the message straight back.
pub struct NullWorker<M> {
    _message: PhantomData<fn(M)>,
}

impl<M> NullWorker<M> {
    pub fn new() -> Self {
        Self { _message: PhantomData }
    }
}

impl<M> Default for NullWorker<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for NullWorker<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NullWorker")
    }
}

impl<M> WorkerDeliver<M> for NullWorker<M> {
    fn name(&self) -> &str {
        "null"
    }

    fn state(&self) -> WorkerState {
        WorkerState::Idle
    }

    fn wake(&self) -> bool {
        false
    }

    fn wake_all_and_wait(&self) {}

    fn run_as(&self, _outbox: &mut Outbox<M>, tail: Option<M>) -> Result<(), Option<M>> {
        Err(tail)
    }

    fn run_one(&self, _outbox: &mut Outbox<M>, tail: M) -> Result<(), M> {
        Err(tail)
    }

    fn shutdown(&self, _mode: ShutdownMode) {}
}
