use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use super::blocker::RingBlocker;
use super::counter::CounterGroup;
use super::error::{QueueError, QueueResult};
use super::ring::RingQueue;
use crate::deliver::handler::{begin_batch, deliver_one, end_batch};
use crate::deliver::{Deliver, Outbox, WorkerDeliver};

/// Producer head counter.
const HEAD: usize = 0;

/// High bit of the head counter; once set no producer can claim a slot.
const WRITE_CLOSED: u64 = 1 << 63;

/// Slots consumed before the tail is published during a plain drain.
const DELIVER_CHUNK: u64 = 64;

/// Stage chunks start small so the next stage gets going quickly, then grow.
const STAGE_CHUNK_MIN: u64 = 2;
const STAGE_CHUNK_MAX: u64 = 256;

/// Fixed-capacity ring with a power-of-two slot count.
///
/// One slot is always kept free, so at most `capacity - 1` values are held.
pub struct FixedRing<M> {
    slots: Box<[Mutex<Option<M>>]>,
    mask: u64,
    counters: CounterGroup,
    blocker: RingBlocker,
}

impl<M> FixedRing<M> {
    /// Plain single-consumer ring with a head and a tail counter.
    pub fn new(capacity: usize) -> QueueResult<Self> {
        Self::with_counters(capacity, 2)
    }

    /// Ring whose counters are shared by `counter_count - 1` pipeline stages.
    pub fn with_counters(capacity: usize, counter_count: usize) -> QueueResult<Self> {
        Self::starting_at(capacity, counter_count, 0)
    }

    /// Ring whose counters all start at `initial`, used when a resizing
    /// queue chains a new ring after a full one.
    pub fn starting_at(capacity: usize, counter_count: usize, initial: u64) -> QueueResult<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(QueueError::InvalidCapacity { capacity });
        }

        let counters = CounterGroup::new(counter_count, initial)?;
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();

        Ok(Self {
            slots,
            mask: capacity as u64 - 1,
            counters,
            blocker: RingBlocker::new(),
        })
    }

    pub fn counters(&self) -> &CounterGroup {
        &self.counters
    }

    pub(crate) fn blocker(&self) -> &RingBlocker {
        &self.blocker
    }

    fn slot(&self, index: u64) -> &Mutex<Option<M>> {
        &self.slots[(index & self.mask) as usize]
    }

    fn counter(&self, index: usize) -> u64 {
        let value = self.counters.get(index);
        if index == HEAD {
            value & !WRITE_CLOSED
        } else {
            value
        }
    }

    fn tail(&self) -> u64 {
        self.counters.get(self.counters.tail_index())
    }

    pub(crate) fn is_full(&self) -> bool {
        let tail = self.tail();
        let head = self.counter(HEAD);
        self.slots.len() as u64 <= head + 1 - tail
    }

    /// Single attempt to claim the next slot.
    pub(crate) fn try_offer_slot(&self, value: M) -> Result<(), M> {
        let capacity = self.slots.len() as u64;

        loop {
            // tail before head: a stale tail only overestimates the size
            let tail = self.tail();
            let head = self.counters.get(HEAD);

            if head & WRITE_CLOSED != 0 || capacity <= head + 1 - tail {
                return Err(value);
            }

            if self.counters.compare_exchange(HEAD, head, head + 1) {
                *self.slot(head).lock() = Some(value);
                self.blocker.poll_wake();
                return Ok(());
            }
        }
    }

    /// Single attempt to remove the oldest value, for consumers racing on the tail.
    pub(crate) fn try_poll_slot(&self) -> Option<M> {
        let tail_index = self.counters.tail_index();
        let backoff = Backoff::new();

        loop {
            let tail = self.counters.get(tail_index);
            let head = self.counter(tail_index - 1);
            if tail >= head {
                return None;
            }

            let taken = self.slot(tail).lock().take();
            match taken {
                Some(value) => {
                    if self.counters.compare_exchange(tail_index, tail, tail + 1) {
                        self.blocker.offer_wake();
                        return Some(value);
                    }
                    // stale tail: the value belongs to a later lap, hand it back
                    *self.slot(tail).lock() = Some(value);
                }
                // claimed but not yet stored, or another consumer holds it
                None => backoff.snooze(),
            }
        }
    }

    fn take_slot(&self, index: u64) -> M {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.slot(index).lock().take() {
                return value;
            }
            backoff.snooze();
        }
    }

    fn read_slot(&self, index: u64) -> M
    where
        M: Clone,
    {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.slot(index).lock().as_ref() {
                return value.clone();
            }
            backoff.snooze();
        }
    }

    /// Drains every published value without running batch hooks.
    pub(crate) fn drain(&self, handler: &mut dyn Deliver<M>, outbox: &mut Outbox<M>) -> usize {
        let tail_index = self.counters.tail_index();
        let head_index = tail_index - 1;
        let mut tail = self.counters.get(tail_index);
        let mut delivered = 0;

        loop {
            let head = self.counter(head_index);
            if tail >= head {
                break;
            }

            let end = head.min(tail + DELIVER_CHUNK);
            while tail < end {
                let value = self.take_slot(tail);
                tail += 1;
                deliver_one(handler, value, outbox);
                delivered += 1;
            }

            self.counters.set(tail_index, tail);
            self.blocker.offer_wake();
        }

        delivered
    }

    /// Drains one pipeline stage's range without running batch hooks.
    pub(crate) fn drain_stage(
        &self,
        handler: &mut dyn Deliver<M>,
        outbox: &mut Outbox<M>,
        head_index: usize,
        tail_index: usize,
        next: Option<&dyn WorkerDeliver<M>>,
        is_tail: bool,
    ) -> usize
    where
        M: Clone,
    {
        let mut tail = self.counters.get(tail_index);
        let mut chunk = STAGE_CHUNK_MIN;
        let mut delivered = 0;

        loop {
            let head = self.counter(head_index);
            if tail >= head {
                break;
            }

            let end = head.min(tail + chunk);
            while tail < end {
                let value = if is_tail {
                    self.take_slot(tail)
                } else {
                    self.read_slot(tail)
                };
                tail += 1;
                deliver_one(handler, value, outbox);
                delivered += 1;
            }

            self.counters.set(tail_index, tail);
            if is_tail {
                self.blocker.offer_wake();
            }
            if let Some(next) = next {
                next.wake();
            }

            chunk = (chunk * 2).min(STAGE_CHUNK_MAX);
        }

        delivered
    }

    fn remaining(deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }
}

impl<M: Send> RingQueue<M> for FixedRing<M> {
    fn head(&self) -> u64 {
        self.counter(HEAD)
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn size(&self) -> usize {
        let tail = self.tail();
        let head = self.counter(HEAD);
        (head - tail) as usize
    }

    fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.size() + 1)
    }

    fn counter_group_size(&self) -> usize {
        self.counters.len()
    }

    fn offer(&self, value: M, timeout: Duration) -> Result<(), M> {
        let deadline = Instant::now().checked_add(timeout);
        let mut value = value;

        loop {
            value = match self.try_offer_slot(value) {
                Ok(()) => return Ok(()),
                Err(value) => value,
            };

            if self.is_write_closed() || self.blocker.is_closed() {
                return Err(value);
            }

            let sequence = self.blocker.offer_sequence();
            if !self.is_full() {
                continue;
            }

            if !self.blocker.offer_wait(sequence, Self::remaining(deadline)) {
                return Err(value);
            }
        }
    }

    fn poll(&self, timeout: Duration) -> Option<M> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if let Some(value) = self.try_poll_slot() {
                return Some(value);
            }

            let sequence = self.blocker.poll_sequence();
            if !RingQueue::is_empty(self) {
                continue;
            }

            if !self.blocker.poll_wait(sequence, Self::remaining(deadline)) {
                return None;
            }
        }
    }

    fn take(&self) -> QueueResult<M> {
        self.poll(Duration::MAX).ok_or(QueueError::Closed)
    }

    fn deliver(&self, handler: &mut dyn Deliver<M>, outbox: &mut Outbox<M>) -> usize {
        begin_batch(handler);
        let delivered = self.drain(handler, outbox);
        end_batch(handler);
        delivered
    }

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
        M: Clone,
    {
        begin_batch(handler);
        let delivered = self.drain_stage(handler, outbox, head_index, tail_index, next, is_tail);
        end_batch(handler);
        delivered
    }

    fn close_write(&self) {
        self.counters.fetch_or(HEAD, WRITE_CLOSED);
        self.blocker.offer_wake();
        self.blocker.poll_wake();
    }

    fn is_write_closed(&self) -> bool {
        self.counters.get(HEAD) & WRITE_CLOSED != 0
    }

    fn shutdown(&self) {
        self.close_write();
        self.blocker.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.blocker.is_closed()
    }
}

impl<M> std::fmt::Debug for FixedRing<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedRing")
            .field("capacity", &self.slots.len())
            .field("counters", &self.counters)
            .finish()
    }
}
