//! Fixtures shared by the delivery tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::deliver::{
    Deliver, DeliverError, DeliverResult, Executor, Message, NullWorker, Outbox, QueueDeliver, Task,
    WorkerRef,
};

/// Late-bound address of a test queue, filled once the queue is built.
pub type Route = Arc<OnceLock<QueueDeliver<Probe>>>;

pub fn route() -> Route {
    Arc::new(OnceLock::new())
}

#[derive(Clone)]
pub struct Probe {
    pub id: u32,
    pub route: Route,
}

impl Probe {
    pub fn new(id: u32, route: &Route) -> Self {
        Self {
            id,
            route: route.clone(),
        }
    }
}

impl Message for Probe {
    fn offer_queue(self, timeout: Duration) -> bool {
        let route = self.route.clone();
        match route.get() {
            Some(queue) => queue.offer(self, timeout).is_ok(),
            None => false,
        }
    }

    fn worker(&self) -> WorkerRef<Self> {
        match self.route.get() {
            Some(queue) => queue.worker().clone(),
            None => Arc::new(NullWorker::new()),
        }
    }
}

/// What a [`Recorder`] saw.
#[derive(Debug, Default)]
pub struct Journal {
    pub delivered: Mutex<Vec<u32>>,
    pub threads: Mutex<Vec<ThreadId>>,
    pub before: AtomicUsize,
    pub after: AtomicUsize,
}

impl Journal {
    pub fn ids(&self) -> Vec<u32> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn batches(&self) -> (usize, usize) {
        (
            self.before.load(Ordering::SeqCst),
            self.after.load(Ordering::SeqCst),
        )
    }
}

/// Handler that records every delivery and can forward, fail or panic.
pub struct Recorder {
    journal: Arc<Journal>,
    forward: Option<Route>,
    fail_even: bool,
    panic_on: Option<u32>,
}

impl Recorder {
    pub fn new(journal: &Arc<Journal>) -> Self {
        Self {
            journal: journal.clone(),
            forward: None,
            fail_even: false,
            panic_on: None,
        }
    }

    pub fn forwarding(mut self, route: &Route) -> Self {
        self.forward = Some(route.clone());
        self
    }

    pub fn failing_even(mut self) -> Self {
        self.fail_even = true;
        self
    }

    pub fn panicking_on(mut self, id: u32) -> Self {
        self.panic_on = Some(id);
        self
    }

    pub fn boxed(self) -> Box<dyn Deliver<Probe>> {
        Box::new(self)
    }
}

impl Deliver<Probe> for Recorder {
    fn deliver(&mut self, msg: Probe, outbox: &mut Outbox<Probe>) -> DeliverResult<()> {
        self.journal.delivered.lock().push(msg.id);
        self.journal.threads.lock().push(thread::current().id());

        if self.panic_on == Some(msg.id) {
            panic!("probe {} panicked", msg.id);
        }
        if self.fail_even && msg.id % 2 == 0 {
            return Err(DeliverError::handler(format!("probe {} rejected", msg.id)));
        }
        if let Some(forward) = &self.forward {
            outbox.offer(Probe::new(msg.id, forward));
        }
        Ok(())
    }

    fn before_batch(&mut self) {
        self.journal.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_batch(&mut self) -> DeliverResult<()> {
        self.journal.after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Executor that holds tasks until the test runs them.
#[derive(Default)]
pub struct ParkedExecutor {
    tasks: Mutex<Vec<Task>>,
}

impl ParkedExecutor {
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs the most recently parked task. Returns `false` when none was parked.
    pub fn run_next(&self) -> bool {
        let next = self.tasks.lock().pop();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs parked tasks, including ones they launch, until none remain.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Executor for ParkedExecutor {
    fn execute(&self, task: Task) -> DeliverResult<()> {
        self.tasks.lock().push(task);
        Ok(())
    }
}

pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    check()
}

/// Single-worker queue over `executor`, registered in a fresh route.
pub fn single_queue(
    name: &str,
    executor: Arc<dyn Executor>,
    deliver: Box<dyn Deliver<Probe>>,
) -> (Route, QueueDeliver<Probe>) {
    let route = route();
    let queue = crate::deliver::QueueDeliverBuilder::new(name)
        .size_max(64)
        .executor(executor)
        .build(deliver)
        .unwrap();
    let _ = route.set(queue.clone());
    (route, queue)
}
