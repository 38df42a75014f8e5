//! Executors that run launched worker passes

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::builder::DEFAULT_THREAD_MAX;
use super::error::{DeliverError, DeliverResult};
use super::handler::panic_message;
use super::launcher::{Executor, RunnableItem, Scheduler, Task};

static CURRENT_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();

/// How long a thread above the core size waits for work before it exits.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

thread_local! {
    static CURRENT_LABEL: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

enum Job {
    Plain(Task),
    Labelled(RunnableItem),
}

/// Counters and the job channel shared by the pool and its threads.
struct PoolShared {
    name: String,
    receiver: Receiver<Job>,
    /// Threads parked on the channel.
    idle: AtomicUsize,
    /// Jobs sent but not yet picked up.
    queued: AtomicUsize,
    live: AtomicUsize,
    spawned: AtomicUsize,
    max: usize,
    idle_timeout: Duration,
}

/// Named threads fed from one channel.
///
/// The pool keeps `size` threads for its whole life and starts extra ones
/// while submitted jobs outnumber parked threads, up to `max`. Worker runs
/// may block on a full downstream queue; growing keeps the runs that would
/// drain that queue from starving behind them. Extra threads exit after
/// [`IDLE_TIMEOUT`] without work.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl ThreadPool {
    pub fn new(name: &str, size: usize) -> DeliverResult<Self> {
        Self::with_max(name, size, DEFAULT_THREAD_MAX.max(size))
    }

    /// Pool of `size` core threads that grows to at most `max` threads.
    pub fn with_max(name: &str, size: usize, max: usize) -> DeliverResult<Self> {
        Self::build(name, size, max, IDLE_TIMEOUT)
    }

    fn build(name: &str, size: usize, max: usize, idle_timeout: Duration) -> DeliverResult<Self> {
        if size == 0 {
            return Err(DeliverError::config("thread pool needs at least one thread"));
        }
        if max < size {
            return Err(DeliverError::config(format!(
                "thread pool maximum {} is below its core size {}",
                max, size
            )));
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let pool = Self {
            shared: Arc::new(PoolShared {
                name: name.to_string(),
                receiver,
                idle: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
                max,
                idle_timeout,
            }),
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(Vec::with_capacity(size)),
            size,
        };

        for _ in 0..size {
            pool.shared.live.fetch_add(1, Ordering::AcqRel);
            pool.spawn(true)?;
        }

        log::debug!("thread pool {} started with {} threads (max {})", name, size, max);
        Ok(pool)
    }

    /// Process-wide pool sized by the available parallelism.
    pub fn current() -> DeliverResult<Arc<ThreadPool>> {
        if let Some(pool) = CURRENT_POOL.get() {
            return Ok(pool.clone());
        }

        let size = thread::available_parallelism().map_or(4, |n| n.get().max(2));
        let pool = Arc::new(ThreadPool::new("courier", size)?);
        Ok(CURRENT_POOL.get_or_init(|| pool).clone())
    }

    /// Label of the worker whose run is executing on this thread, if any.
    pub fn current_label() -> Option<Arc<str>> {
        CURRENT_LABEL.with(|label| label.borrow().clone())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Threads the pool keeps even when idle.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max(&self) -> usize {
        self.shared.max
    }

    /// Threads currently running, core and extra.
    pub fn thread_count(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Stops accepting tasks and joins the threads once queued tasks finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in threads {
            // a pool thread shutting down its own pool cannot join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("thread pool {}: worker thread panicked", self.shared.name);
            }
        }
    }

    /// Starts one thread; the caller has already counted it in `live`.
    fn spawn(&self, core: bool) -> DeliverResult<()> {
        let shared = self.shared.clone();
        let index = shared.spawned.fetch_add(1, Ordering::Relaxed);

        let spawned = thread::Builder::new()
            .name(format!("{}-{}", shared.name, index))
            .spawn(move || Self::work(&shared, core));

        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock();
                threads.retain(|handle| !handle.is_finished());
                threads.push(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                Err(DeliverError::Launch {
                    message: format!("cannot spawn {} thread {}: {}", self.shared.name, index, err),
                })
            }
        }
    }

    /// Starts an extra thread when sent jobs outnumber parked threads.
    fn grow(&self) {
        let shared = &self.shared;
        if shared.queued.load(Ordering::Acquire) <= shared.idle.load(Ordering::Acquire) {
            return;
        }

        let claimed = shared
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < shared.max).then_some(live + 1)
            })
            .is_ok();
        if !claimed {
            return;
        }

        log::trace!("thread pool {}: all threads busy, starting another", shared.name);
        if let Err(err) = self.spawn(false) {
            log::warn!("{}", err);
        }
    }

    fn submit(&self, job: Job) -> DeliverResult<()> {
        {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                return Err(DeliverError::Launch {
                    message: format!("thread pool {} is shut down", self.shared.name),
                });
            };

            self.shared.queued.fetch_add(1, Ordering::AcqRel);
            if sender.send(job).is_err() {
                self.shared.queued.fetch_sub(1, Ordering::AcqRel);
                return Err(DeliverError::Launch {
                    message: format!("thread pool {} has no running threads", self.shared.name),
                });
            }
        }

        self.grow();
        Ok(())
    }

    fn next_job(shared: &PoolShared, core: bool) -> Option<Job> {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let job = if core {
            shared.receiver.recv().ok()
        } else {
            shared.receiver.recv_timeout(shared.idle_timeout).ok()
        };
        shared.idle.fetch_sub(1, Ordering::AcqRel);

        if job.is_some() {
            shared.queued.fetch_sub(1, Ordering::AcqRel);
        }
        job
    }

    fn work(shared: &PoolShared, core: bool) {
        while let Some(job) = Self::next_job(shared, core) {
            let (label, task) = match job {
                Job::Plain(task) => (None, task),
                Job::Labelled(item) => (Some(item.label), item.task),
            };

            let previous = CURRENT_LABEL.with(|current| current.replace(label));
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                log::error!(
                    "{}: task panicked: {}",
                    thread::current().name().unwrap_or("pool"),
                    panic_message(payload.as_ref())
                );
            }
            CURRENT_LABEL.with(|current| current.replace(previous));
        }

        shared.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) -> DeliverResult<()> {
        self.submit(Job::Plain(task))
    }

    fn scheduler(&self) -> Option<&dyn Scheduler> {
        Some(self)
    }
}

impl Scheduler for ThreadPool {
    fn schedule(&self, item: RunnableItem) -> DeliverResult<()> {
        log::trace!("thread pool {}: scheduling {}", self.shared.name, item.label);
        self.submit(Job::Labelled(item))
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.get_mut().take();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.shared.name)
            .field("size", &self.size)
            .field("max", &self.shared.max)
            .field("threads", &self.thread_count())
            .finish()
    }
}

/// Runs worker passes on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime the caller is running on.
    pub fn current() -> DeliverResult<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|err| DeliverError::Launch {
                message: format!("no tokio runtime available: {}", err),
            })
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> DeliverResult<()> {
        // passes block on ring waits, so they belong on the blocking pool
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_rejects_zero_threads() {
        assert!(ThreadPool::new("empty", 0).is_err());
    }

    #[test]
    fn test_pool_runs_tasks_and_survives_panics() {
        let pool = ThreadPool::new("test-pool", 2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(Box::new(|| panic!("task failure"))).unwrap();
        for _ in 0..10 {
            let ran = ran.clone();
            pool.execute(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_scheduled_tasks_see_their_label() {
        let pool = ThreadPool::new("label-pool", 1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        pool.schedule(RunnableItem {
            label: Arc::from("inbox-a"),
            task: Box::new(move || {
                let _ = tx.send(ThreadPool::current_label());
            }),
        })
        .unwrap();

        let label = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(label.as_deref(), Some("inbox-a"));
        pool.shutdown();
    }

    #[test]
    fn test_pool_grows_while_its_threads_block() {
        let pool = ThreadPool::new("grow-pool", 1).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<&str>(2);

        // the first task waits for the second, as a worker waits on a full downstream queue
        let blocked_done = done_tx.clone();
        pool.execute(Box::new(move || {
            let released = release_rx.recv_timeout(Duration::from_secs(5)).is_ok();
            let _ = blocked_done.send(if released { "blocked" } else { "timed out" });
        }))
        .unwrap();
        pool.execute(Box::new(move || {
            let _ = release_tx.send(());
            let _ = done_tx.send("release");
        }))
        .unwrap();

        let mut seen = vec![
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        seen.sort_unstable();
        assert_eq!(seen, vec!["blocked", "release"]);
        assert!(pool.thread_count() >= 2);
        pool.shutdown();
    }

    #[test]
    fn test_pool_stays_within_max() {
        let pool = ThreadPool::with_max("capped-pool", 1, 1).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
        let second = ran.clone();
        pool.execute(Box::new(move || {
            second.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.thread_count(), 1);

        release_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_below_size_rejected() {
        assert!(ThreadPool::with_max("inverted", 4, 2).is_err());
    }

    #[test]
    fn test_extra_threads_retire_when_idle() {
        let pool = ThreadPool::build("retire-pool", 1, 8, Duration::from_millis(20)).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        pool.execute(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
        pool.execute(Box::new(move || {
            let _ = release_tx.send(());
        }))
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.thread_count() > 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.thread_count(), 1);
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = ThreadPool::new("closed-pool", 1).unwrap();
        pool.shutdown();
        assert!(pool.execute(Box::new(|| {})).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_executor_runs_on_blocking_pool() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        executor
            .execute(Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            }))
            .unwrap();

        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_tokio_executor_requires_runtime() {
        assert!(TokioExecutor::current().is_err());
    }
}
