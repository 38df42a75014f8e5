use std::time::Duration;

use super::error::QueueResult;
use crate::deliver::{Deliver, Outbox, WorkerDeliver};

/// A bounded (or bounded-after-growth) multi-producer ring of messages.
///
/// Offers never block unless the caller asks for it: `offer` with a zero
/// timeout is a single attempt, `put` waits for as long as it takes.
/// Consumption happens either element-wise (`poll`, `take`) for consumers
/// racing on the same ring, or batch-wise through `deliver` for the single
/// consumer that owns it.
pub trait RingQueue<M>: Send + Sync {
    /// Monotonic producer position.
    fn head(&self) -> u64;

    fn capacity(&self) -> usize;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn remaining_capacity(&self) -> usize;

    /// Number of head/tail counters the ring is partitioned into.
    fn counter_group_size(&self) -> usize;

    /// Offers a value, waiting up to `timeout` for space.
    ///
    /// Hands the value back when the ring stayed full or was shut down.
    fn offer(&self, value: M, timeout: Duration) -> Result<(), M>;

    fn try_offer(&self, value: M) -> Result<(), M> {
        self.offer(value, Duration::ZERO)
    }

    /// Blocks until the value is stored; fails only when the ring shuts down.
    fn put(&self, value: M) -> Result<(), M> {
        self.offer(value, Duration::MAX)
    }

    /// Removes the oldest value, waiting up to `timeout` for one to arrive.
    fn poll(&self, timeout: Duration) -> Option<M>;

    fn try_poll(&self) -> Option<M> {
        self.poll(Duration::ZERO)
    }

    /// Blocks until a value is available or the ring shuts down.
    fn take(&self) -> QueueResult<M>;

    /// Moves up to `max` values into `sink`, returning how many were moved.
    fn drain_to(&self, sink: &mut Vec<M>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.try_poll() {
                Some(value) => {
                    sink.push(value);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    /// Drains the ring through `handler` until it is observed empty.
    ///
    /// `before_batch` and `after_batch` run exactly once per call. A failing
    /// delivery is logged and the batch continues. Returns the number of
    /// messages handed to the handler.
    fn deliver(&self, handler: &mut dyn Deliver<M>, outbox: &mut Outbox<M>) -> usize;

    /// Pipeline variant of [`deliver`](Self::deliver).
    ///
    /// Consumes only the range between counter `tail_index` and counter
    /// `head_index`. Non-tail stages read values in place and wake `next`
    /// as they publish progress; the tail stage removes values and frees
    /// their slots for producers.
    #[allow(clippy::too_many_arguments)]
    fn deliver_stage(
        &self,
        handler: &mut dyn Deliver<M>,
        outbox: &mut Outbox<M>,
        head_index: usize,
        tail_index: usize,
        next: Option<&dyn WorkerDeliver<M>>,
        is_tail: bool,
    ) -> usize
    where
        M: Clone;

    /// Refuses further writes; values already claimed stay readable.
    fn close_write(&self);

    fn is_write_closed(&self) -> bool;

    /// Closes the ring and releases every blocked producer and consumer.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// Draining iterator over a ring; each step is a non-blocking poll.
pub struct Drain<'a, M> {
    queue: &'a dyn RingQueue<M>,
}

impl<'a, M> Drain<'a, M> {
    pub fn new(queue: &'a dyn RingQueue<M>) -> Self {
        Self { queue }
    }
}

impl<M> Iterator for Drain<'_, M> {
    type Item = M;

    fn next(&mut self) -> Option<M> {
        self.queue.try_poll()
    }
}

impl<M> dyn RingQueue<M> + '_ {
    pub fn drain(&self) -> Drain<'_, M> {
        Drain::new(self)
    }
}
