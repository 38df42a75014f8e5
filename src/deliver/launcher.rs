//! Submission of worker runs to an executor

use std::sync::Arc;
use std::time::Duration;

use super::error::{DeliverError, DeliverResult};

/// Upper bound on how long `launch_and_wait` blocks for the run to finish.
pub const LAUNCH_WAIT: Duration = Duration::from_millis(10);

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget task submission.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task) -> DeliverResult<()>;

    /// Richer submission path, when the executor offers one.
    fn scheduler(&self) -> Option<&dyn Scheduler> {
        None
    }
}

/// Executor that accepts tasks tagged with the submitting worker's label.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, item: RunnableItem) -> DeliverResult<()>;
}

pub struct RunnableItem {
    pub label: Arc<str>,
    pub task: Task,
}

impl std::fmt::Debug for RunnableItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableItem").field("label", &self.label).finish()
    }
}

/// Launches runs for one worker, preferring the scheduler path.
#[derive(Clone)]
pub struct Launcher {
    executor: Arc<dyn Executor>,
    label: Arc<str>,
}

impl Launcher {
    pub fn new(executor: Arc<dyn Executor>, label: impl Into<Arc<str>>) -> Self {
        Self {
            executor,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn launch(&self, task: Task) -> DeliverResult<()> {
        match self.executor.scheduler() {
            Some(scheduler) => scheduler.schedule(RunnableItem {
                label: self.label.clone(),
                task,
            }),
            None => self.executor.execute(task),
        }
    }

    /// Launches `task` and waits up to [`LAUNCH_WAIT`] for it to complete.
    ///
    /// Returns whether the task finished within the wait.
    pub fn launch_and_wait(&self, task: Task) -> DeliverResult<bool> {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        self.launch(Box::new(move || {
            task();
            let _ = done_tx.send(());
        }))?;

        Ok(done_rx.recv_timeout(LAUNCH_WAIT).is_ok())
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher").field("label", &self.label).finish()
    }
}

/// Executor that runs every task on the submitting thread.
///
/// Useful for deterministic tests and for embedding a worker in a thread the
/// caller already owns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> DeliverResult<()> {
        task();
        Ok(())
    }
}

/// Executor that refuses every task.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingExecutor;

impl Executor for RejectingExecutor {
    fn execute(&self, _task: Task) -> DeliverResult<()> {
        Err(DeliverError::Launch {
            message: "executor rejects all tasks".to_string(),
        })
    }
}
