use std::sync::Arc;
use std::time::Duration;

use super::handler::ShutdownMode;
use super::worker::WorkerRef;
use crate::queue::RingQueue;

/// A ring queue bound to the worker (or coordinator) that drains it.
pub struct QueueDeliver<M> {
    queue: Arc<dyn RingQueue<M>>,
    worker: WorkerRef<M>,
    single: bool,
}

impl<M> Clone for QueueDeliver<M> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            worker: self.worker.clone(),
            single: self.single,
        }
    }
}

impl<M> QueueDeliver<M> {
    pub fn new(queue: Arc<dyn RingQueue<M>>, worker: WorkerRef<M>, single: bool) -> Self {
        Self { queue, worker, single }
    }

    pub fn queue(&self) -> &Arc<dyn RingQueue<M>> {
        &self.queue
    }

    pub fn worker(&self) -> &WorkerRef<M> {
        &self.worker
    }

    /// Whether at most one run drains the queue at a time.
    pub fn is_single_worker(&self) -> bool {
        self.single
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues without waking. Hands the message back if the queue stayed
    /// full for `timeout`.
    ///
    /// A full queue wakes the worker before waiting, since nothing else may
    /// be draining it.
    pub fn offer(&self, msg: M, timeout: Duration) -> Result<(), M> {
        let msg = match self.queue.try_offer(msg) {
            Ok(()) => return Ok(()),
            Err(msg) => msg,
        };

        if timeout.is_zero() {
            return Err(msg);
        }

        self.worker.wake();
        self.queue.offer(msg, timeout)
    }

    pub fn wake(&self) -> bool {
        self.worker.wake()
    }

    pub fn wake_all(&self) -> bool {
        self.worker.wake_all()
    }

    pub fn wake_all_and_wait(&self) {
        self.worker.wake_all_and_wait()
    }

    /// Stops the worker; an immediate shutdown also closes the ring.
    pub fn shutdown(&self, mode: ShutdownMode) {
        self.worker.shutdown(mode);

        if mode == ShutdownMode::Immediate {
            self.queue.shutdown();
        }
    }
}

impl<M> std::fmt::Debug for QueueDeliver<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDeliver")
            .field("worker", &self.worker.name())
            .field("size", &self.queue.size())
            .field("capacity", &self.queue.capacity())
            .field("single", &self.single)
            .finish()
    }
}
