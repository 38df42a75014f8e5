//! Worker run loop
//!
//! A [`Worker`] pairs the state machine from [`super::state`] with a shape
//! specific [`RunImpl`]. The shape knows how to drain its queue; the worker
//! decides when a drain must happen, on which thread, and guarantees that a
//! wake landing at any point of a run is either seen by that run or causes a
//! new one to be launched.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::error::DeliverResult;
use super::handler::{panic_message, Message, ShutdownMode};
use super::launcher::Launcher;
use super::outbox::{Outbox, OutboxContext};
use super::state::{AtomicWorkerState, Transition, WorkerEvent, WorkerState};

/// Handle to a worker as seen by queues, outboxes and inboxes.
pub trait WorkerDeliver<M>: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> WorkerState;

    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Signals new work. Returns `true` when this call launched a new run.
    fn wake(&self) -> bool;

    fn wake_all(&self) -> bool {
        self.wake()
    }

    /// Wakes and waits briefly for the launched run to finish.
    fn wake_all_and_wait(&self);

    /// Runs the loop on the calling thread if the worker is idle.
    ///
    /// Hands `tail` back when another run is already active.
    fn run_as(&self, outbox: &mut Outbox<M>, tail: Option<M>) -> Result<(), Option<M>>;

    /// Delivers `tail` directly, bypassing the queue, when the worker is idle
    /// and its queue is empty. Hands the message back otherwise.
    fn run_one(&self, outbox: &mut Outbox<M>, tail: M) -> Result<(), M>;

    fn shutdown(&self, mode: ShutdownMode);

    /// Diagnostic summary, e.g. `inbox-a[IDLE starts=3 launches=2 ends=3]`.
    fn state_string(&self) -> String {
        format!("{}[{}]", self.name(), self.state())
    }
}

pub type WorkerRef<M> = Arc<dyn WorkerDeliver<M>>;

/// Identity comparison of two worker handles.
pub fn same_worker<M>(a: &WorkerRef<M>, b: &WorkerRef<M>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Shape-specific part of a worker: how one pass over the queue is made.
pub trait RunImpl<M>: Send + Sync + 'static {
    /// One drain pass. `tail` is a message handed over directly by the caller.
    fn run_impl(&self, outbox: &mut Outbox<M>, tail: Option<M>) -> DeliverResult<()>;

    /// Whether a direct delivery may bypass the queue right now.
    fn is_run_one_valid(&self) -> bool {
        false
    }

    fn run_one_impl(&self, outbox: &mut Outbox<M>, tail: M) -> DeliverResult<()> {
        self.run_impl(outbox, Some(tail))
    }

    fn shutdown(&self, _mode: ShutdownMode) {}
}

#[derive(Debug, Default)]
struct RunStats {
    starts: AtomicU64,
    launches: AtomicU64,
    ends: AtomicU64,
}

impl RunStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Worker<M, R> {
    name: String,
    runner: R,
    context: Option<OutboxContext>,
    state: AtomicWorkerState,
    launcher: Launcher,
    stats: RunStats,
    this: Weak<Self>,
    _message: PhantomData<fn(M)>,
}

impl<M: Message, R: RunImpl<M>> Worker<M, R> {
    pub fn new(
        name: impl Into<String>,
        runner: R,
        launcher: Launcher,
        context: Option<OutboxContext>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            runner,
            context,
            state: AtomicWorkerState::new(WorkerState::Idle),
            launcher,
            stats: RunStats::default(),
            this: this.clone(),
            _message: PhantomData,
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn transition(&self, event: WorkerEvent) -> Transition {
        // an illegal transition is a broken invariant in this module, not a runtime condition
        self.state
            .apply(event)
            .unwrap_or_else(|err| panic!("{}: {}", self.name, err))
    }

    fn task(&self) -> Option<Box<dyn FnOnce() + Send + 'static>> {
        let worker = self.this.upgrade()?;
        Some(Box::new(move || worker.run_task()))
    }

    fn launch(&self) {
        RunStats::bump(&self.stats.launches);

        let Some(task) = self.task() else {
            return;
        };

        if let Err(err) = self.launcher.launch(task) {
            log::warn!("{}: {}", self.name, err);
            // nobody will run: give the claim back so a later wake can retry
            self.state.compare_exchange(WorkerState::ActiveWake, WorkerState::Idle);
        }
    }

    fn launch_and_wait(&self) {
        RunStats::bump(&self.stats.launches);

        let Some(task) = self.task() else {
            return;
        };

        match self.launcher.launch_and_wait(task) {
            Ok(true) => {}
            Ok(false) => log::trace!("{}: run still in flight after wait", self.name),
            Err(err) => {
                log::warn!("{}: {}", self.name, err);
                self.state.compare_exchange(WorkerState::ActiveWake, WorkerState::Idle);
            }
        }
    }

    /// Executor entry point for a launched run.
    fn run_task(&self) {
        RunStats::bump(&self.stats.starts);

        if self.transition(WorkerEvent::Resume).next.is_closed() {
            return;
        }

        let mut outbox = Outbox::new();
        self.run_started(&mut outbox, None);
        outbox.flush_and_execute_all();
    }

    fn run_started(&self, outbox: &mut Outbox<M>, tail: Option<M>) {
        let previous = outbox.get_and_set_context(self.context.clone());
        let mut tail = tail;

        loop {
            let pass = panic::catch_unwind(AssertUnwindSafe(|| {
                self.runner.run_impl(outbox, tail.take())
            }));

            match pass {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::debug!("{}: run ended by error: {}", self.state_string(), err);
                    break;
                }
                Err(payload) => {
                    log::debug!(
                        "{}: run ended by panic: {}",
                        self.state_string(),
                        panic_message(payload.as_ref())
                    );
                    break;
                }
            }

            let state = self.state.load();
            let finished = state
                .on(WorkerEvent::Finish)
                .unwrap_or_else(|err| panic!("{}: {}", self.name, err));
            if finished.is_closed() || finished.is_idle() {
                break;
            }

            // a wake arrived during the pass: drain again
            self.state.compare_exchange(state, WorkerState::Active);
        }

        outbox.get_and_set_context(previous);
        RunStats::bump(&self.stats.ends);

        if self.transition(WorkerEvent::Finish).next.is_active() {
            self.launch();
        }
    }

    fn run_one_started(&self, outbox: &mut Outbox<M>, tail: M) {
        let previous = outbox.get_and_set_context(self.context.clone());

        let pass = panic::catch_unwind(AssertUnwindSafe(|| self.runner.run_one_impl(outbox, tail)));
        match pass {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::debug!("{}: direct delivery failed: {}", self.state_string(), err);
                outbox.flush();
            }
            Err(payload) => {
                log::debug!(
                    "{}: direct delivery panicked: {}",
                    self.state_string(),
                    panic_message(payload.as_ref())
                );
                outbox.flush();
            }
        }

        outbox.get_and_set_context(previous);
        RunStats::bump(&self.stats.ends);

        if self.transition(WorkerEvent::Finish).next.is_active() {
            self.launch();
        }
    }
}

impl<M: Message, R: RunImpl<M>> WorkerDeliver<M> for Worker<M, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        self.state.load()
    }

    fn wake(&self) -> bool {
        if self.transition(WorkerEvent::Wake).claimed_run() {
            self.launch();
            true
        } else {
            false
        }
    }

    fn wake_all_and_wait(&self) {
        if self.transition(WorkerEvent::Wake).claimed_run() {
            self.launch_and_wait();
        }
    }

    fn run_as(&self, outbox: &mut Outbox<M>, tail: Option<M>) -> Result<(), Option<M>> {
        if !self.state.load().is_idle() || !self.transition(WorkerEvent::Start).claimed_run() {
            return Err(tail);
        }

        RunStats::bump(&self.stats.starts);
        self.run_started(outbox, tail);
        Ok(())
    }

    fn run_one(&self, outbox: &mut Outbox<M>, tail: M) -> Result<(), M> {
        if !self.runner.is_run_one_valid() || !self.state.load().is_idle() {
            return Err(tail);
        }

        if !self.transition(WorkerEvent::Start).claimed_run() {
            return Err(tail);
        }

        RunStats::bump(&self.stats.starts);
        self.run_one_started(outbox, tail);
        Ok(())
    }

    fn shutdown(&self, mode: ShutdownMode) {
        self.runner.shutdown(mode);

        match mode {
            ShutdownMode::Immediate => {
                self.transition(WorkerEvent::Close);
            }
            ShutdownMode::Graceful => self.wake_all_and_wait(),
        }
    }

    fn state_string(&self) -> String {
        format!(
            "{}[{} starts={} launches={} ends={}]",
            self.name,
            self.state.load(),
            self.stats.starts.load(Ordering::Relaxed),
            self.stats.launches.load(Ordering::Relaxed),
            self.stats.ends.load(Ordering::Relaxed),
        )
    }
}

impl<M, R> std::fmt::Debug for Worker<M, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
