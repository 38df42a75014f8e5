//! Construction of queue + worker pairs

use std::sync::Arc;

use super::disruptor::Pipeline;
use super::error::{DeliverError, DeliverResult};
use super::executor::ThreadPool;
use super::handler::{Deliver, Message};
use super::launcher::{Executor, Launcher};
use super::multi::{MultiCoordinator, MultiThread};
use super::outbox::OutboxContext;
use super::queue_deliver::QueueDeliver;
use super::single::SingleThread;
use super::worker::{Worker, WorkerRef};
use crate::core::config::QueueConfig;
use crate::queue::{FixedRing, ResizingRing, RingQueue};

pub const DEFAULT_INITIAL: usize = 16;
pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_THREAD_MAX: usize = 64 * 1024;

#[derive(Clone)]
pub struct QueueDeliverBuilder {
    name: String,
    initial: Option<usize>,
    capacity: Option<usize>,
    multiworker: bool,
    multiworker_offset: usize,
    executor: Option<Arc<dyn Executor>>,
    context: Option<OutboxContext>,
    thread_max: usize,
}

impl QueueDeliverBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            capacity: None,
            multiworker: false,
            multiworker_offset: 1,
            executor: None,
            context: None,
            thread_max: DEFAULT_THREAD_MAX,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &QueueConfig) -> Self {
        Self::new(name)
            .size(config.initial_size)
            .size_max(config.capacity)
            .multiworker_offset(config.multiworker_offset)
            .thread_max(config.thread_max)
    }

    /// Initial ring size; zero keeps the ring fixed at `size_max`.
    pub fn size(mut self, initial: usize) -> Self {
        self.initial = (initial > 0).then_some(initial);
        self
    }

    pub fn size_max(mut self, capacity: usize) -> Self {
        self.capacity = (capacity > 0).then_some(capacity);
        self
    }

    pub fn multiworker(mut self, multiworker: bool) -> Self {
        self.multiworker = multiworker;
        self
    }

    pub fn multiworker_offset(mut self, offset: usize) -> Self {
        self.multiworker_offset = offset.max(1);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn context(mut self, context: OutboxContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn thread_max(mut self, thread_max: usize) -> Self {
        self.thread_max = thread_max.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_multiworker(&self) -> bool {
        self.multiworker
    }

    /// Effective initial ring size.
    pub fn initial_size(&self) -> usize {
        match (self.initial, self.capacity) {
            (Some(initial), _) => initial,
            (None, Some(capacity)) => capacity,
            (None, None) => DEFAULT_INITIAL,
        }
    }

    /// Effective maximum ring size.
    pub fn max_size(&self) -> usize {
        self.capacity.unwrap_or(DEFAULT_CAPACITY)
    }

    /// Single-consumer worker draining a new queue through `deliver`.
    pub fn build<M: Message>(&self, deliver: Box<dyn Deliver<M>>) -> DeliverResult<QueueDeliver<M>> {
        let queue = self.build_queue::<M>(2)?;
        let launcher = self.launcher()?;

        let worker: WorkerRef<M> = Worker::new(
            self.name.clone(),
            SingleThread::new(queue.clone(), deliver),
            launcher,
            self.context.clone(),
        );

        log::debug!(
            "{}: single worker over ring {}..{}",
            self.name,
            self.initial_size(),
            self.max_size()
        );
        Ok(QueueDeliver::new(queue, worker, true))
    }

    /// `count` workers racing on one queue, each with its own handler.
    ///
    /// Falls back to a single worker when multiworker is off or `count` is 1.
    pub fn build_multi<M, F>(&self, mut factory: F, count: usize) -> DeliverResult<QueueDeliver<M>>
    where
        M: Message,
        F: FnMut(usize) -> Box<dyn Deliver<M>>,
    {
        if count == 0 {
            return Err(DeliverError::config(format!(
                "{}: multiworker queue needs at least one worker",
                self.name
            )));
        }

        let count = count.min(self.thread_max);
        if count == 1 || !self.multiworker {
            return self.build(factory(0));
        }

        let queue = self.build_queue::<M>(2)?;
        let launcher = self.launcher()?;

        let workers: Vec<WorkerRef<M>> = (0..count)
            .map(|index| {
                let worker: WorkerRef<M> = Worker::new(
                    format!("{}.{}", self.name, index),
                    MultiThread::new(queue.clone(), factory(index)),
                    launcher.clone(),
                    self.context.clone(),
                );
                worker
            })
            .collect();

        log::debug!(
            "{}: {} workers, wake offset {}",
            self.name,
            count,
            self.multiworker_offset
        );

        let coordinator = MultiCoordinator::new(
            self.name.clone(),
            queue.clone(),
            workers,
            self.multiworker_offset,
        );
        Ok(QueueDeliver::new(queue, Arc::new(coordinator), false))
    }

    /// Pipeline where every message passes each handler in order.
    pub fn disruptor<M>(&self, mut handlers: Vec<Box<dyn Deliver<M>>>) -> DeliverResult<QueueDeliver<M>>
    where
        M: Message + Clone,
    {
        let count = handlers.len();
        if count == 0 {
            return Err(DeliverError::config(format!(
                "{}: pipeline needs at least one stage",
                self.name
            )));
        }
        if count == 1 {
            if let Some(handler) = handlers.pop() {
                return self.build(handler);
            }
        }

        let queue = self.build_queue::<M>(count + 1)?;
        let launcher = self.launcher()?;
        let pipeline = Pipeline::new(
            &self.name,
            queue.clone(),
            handlers,
            &launcher,
            self.context.clone(),
        )?;

        log::debug!("{}: pipeline of {} stages", self.name, count);
        Ok(QueueDeliver::new(queue, pipeline, false))
    }

    fn build_queue<M: Send + 'static>(&self, counters: usize) -> DeliverResult<Arc<dyn RingQueue<M>>> {
        let initial = self.initial_size();
        let capacity = self.max_size();

        let queue: Arc<dyn RingQueue<M>> = if initial > 0 && initial < capacity {
            Arc::new(ResizingRing::with_counters(initial, capacity, counters)?)
        } else {
            Arc::new(FixedRing::with_counters(capacity, counters)?)
        };
        Ok(queue)
    }

    pub(crate) fn launcher(&self) -> DeliverResult<Launcher> {
        let executor = match &self.executor {
            Some(executor) => executor.clone(),
            None => {
                let pool: Arc<dyn Executor> = ThreadPool::current()?;
                pool
            }
        };
        Ok(Launcher::new(executor, self.name.as_str()))
    }
}

impl std::fmt::Debug for QueueDeliverBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDeliverBuilder")
            .field("name", &self.name)
            .field("initial", &self.initial_size())
            .field("capacity", &self.max_size())
            .field("multiworker", &self.multiworker)
            .field("multiworker_offset", &self.multiworker_offset)
            .field("thread_max", &self.thread_max)
            .finish()
    }
}
