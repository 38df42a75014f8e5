use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::error::{QueueError, QueueResult};
use super::fixed::FixedRing;
use super::ring::RingQueue;
use crate::deliver::handler::{begin_batch, end_batch};
use crate::deliver::{Deliver, Outbox, WorkerDeliver};

/// Capacity multiplier applied on each growth step.
const GROWTH_FACTOR: usize = 4;

enum Admission<M> {
    Queued,
    Retry(M),
    Refused(M),
}

/// Ring that starts small and grows up to a maximum capacity.
///
/// Growth never copies: the full ring is closed for writes and a larger ring
/// is chained behind it, starting at the old head position so positions stay
/// monotonic. Consumers keep reading the oldest ring until it is closed and
/// empty, then move on to the next one.
///
/// A ring only grows once readers have caught up with it, so at most two
/// rings are chained. Together they hold no more than a fixed ring of the
/// maximum capacity would: `max_capacity - 1` entries.
pub struct ResizingRing<M> {
    max_capacity: usize,
    counter_count: usize,
    rings: RwLock<VecDeque<Arc<FixedRing<M>>>>,
    // serializes writers into the newer ring while the older one drains
    admit: Mutex<()>,
    write_closed: AtomicBool,
}

impl<M: Send> ResizingRing<M> {
    pub fn new(initial: usize, max_capacity: usize) -> QueueResult<Self> {
        Self::with_counters(initial, max_capacity, 2)
    }

    pub fn with_counters(initial: usize, max_capacity: usize, counter_count: usize) -> QueueResult<Self> {
        if max_capacity < 2 || !max_capacity.is_power_of_two() {
            return Err(QueueError::InvalidCapacity { capacity: max_capacity });
        }
        if initial > max_capacity {
            return Err(QueueError::InvalidBounds { initial, max: max_capacity });
        }

        let first = FixedRing::with_counters(initial, counter_count)?;

        Ok(Self {
            max_capacity,
            counter_count,
            rings: RwLock::new(VecDeque::from([Arc::new(first)])),
            admit: Mutex::new(()),
            write_closed: AtomicBool::new(false),
        })
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Number of rings currently chained: 1 once readers have caught up, never more than 2.
    pub fn ring_count(&self) -> usize {
        self.rings.read().len()
    }

    /// Most entries the chain holds at once.
    pub fn limit(&self) -> usize {
        self.max_capacity - 1
    }

    fn ends(&self) -> (Arc<FixedRing<M>>, Arc<FixedRing<M>>) {
        let rings = self.rings.read();
        (rings[0].clone(), rings[rings.len() - 1].clone())
    }

    fn read_ring(&self) -> Arc<FixedRing<M>> {
        let rings = self.rings.read();
        rings[0].clone()
    }

    fn write_ring(&self) -> Arc<FixedRing<M>> {
        let rings = self.rings.read();
        rings[rings.len() - 1].clone()
    }

    /// Chains a larger ring behind `full`, unless another writer already did
    /// or readers are still behind on an older ring.
    fn grow(&self, full: &Arc<FixedRing<M>>) -> QueueResult<()> {
        let mut rings = self.rings.write();

        if rings.len() != 1 || !Arc::ptr_eq(&rings[0], full) {
            return Ok(());
        }

        let capacity = (full.capacity() * GROWTH_FACTOR).min(self.max_capacity);
        full.close_write();
        let next = FixedRing::starting_at(capacity, self.counter_count, full.head())?;

        log::debug!(
            "ring grown from {} to {} slots at position {}",
            full.capacity(),
            capacity,
            full.head()
        );

        rings.push_back(Arc::new(next));
        Ok(())
    }

    /// Offer while readers are still on the older of two rings.
    ///
    /// Space frees up only as readers drain the older ring, so waiting
    /// happens on its blocker.
    fn offer_behind_reader(
        &self,
        read: &FixedRing<M>,
        write: &FixedRing<M>,
        value: M,
        deadline: Option<Instant>,
    ) -> Admission<M> {
        let mut value = value;

        loop {
            let sequence = read.blocker().offer_sequence();
            {
                let _admit = self.admit.lock();
                if read.size() + write.size() < self.limit() {
                    value = match write.try_offer_slot(value) {
                        Ok(()) => return Admission::Queued,
                        Err(value) => value,
                    };
                }
            }

            if write.is_shutdown() || self.write_closed.load(Ordering::Acquire) {
                return Admission::Refused(value);
            }
            // readers caught up: retire the old ring (if no one else has) and re-read the chain
            if read.is_empty() {
                self.poll_resize();
                return Admission::Retry(value);
            }

            let wait = remaining(deadline);
            if wait.is_zero() || !read.blocker().offer_wait(sequence, wait) {
                return Admission::Refused(value);
            }
        }
    }

    /// Retires the oldest ring once it is closed and drained.
    ///
    /// Returns `true` when readers moved on to a newer ring.
    fn poll_resize(&self) -> bool {
        {
            let rings = self.rings.read();
            let front = &rings[0];
            if rings.len() < 2 || !front.is_write_closed() || !front.is_empty() {
                return false;
            }
        }

        let mut rings = self.rings.write();
        if rings.len() > 1 && rings[0].is_write_closed() && rings[0].is_empty() {
            rings.pop_front();
            true
        } else {
            false
        }
    }
}

fn remaining(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

impl<M: Send> RingQueue<M> for ResizingRing<M> {
    fn head(&self) -> u64 {
        self.write_ring().head()
    }

    fn capacity(&self) -> usize {
        self.write_ring().capacity()
    }

    fn size(&self) -> usize {
        self.rings.read().iter().map(|ring| ring.size()).sum()
    }

    fn remaining_capacity(&self) -> usize {
        self.limit().saturating_sub(self.size())
    }

    fn counter_group_size(&self) -> usize {
        self.counter_count
    }

    fn offer(&self, value: M, timeout: Duration) -> Result<(), M> {
        let deadline = Instant::now().checked_add(timeout);
        let mut value = value;

        loop {
            if self.write_closed.load(Ordering::Acquire) {
                return Err(value);
            }

            let (read, write) = self.ends();
            if !Arc::ptr_eq(&read, &write) {
                match self.offer_behind_reader(&read, &write, value, deadline) {
                    Admission::Queued => return Ok(()),
                    Admission::Retry(retry) => {
                        value = retry;
                        continue;
                    }
                    Admission::Refused(value) => return Err(value),
                }
            }

            let ring = write;
            value = match ring.try_offer_slot(value) {
                Ok(()) => return Ok(()),
                Err(value) => value,
            };

            if ring.is_shutdown() {
                return Err(value);
            }

            // closed by a concurrent grow: pick up the new write ring
            if ring.is_write_closed() {
                continue;
            }

            if ring.capacity() < self.max_capacity {
                if let Err(err) = self.grow(&ring) {
                    log::warn!("ring growth failed: {}", err);
                    return ring.offer(value, remaining(deadline));
                }
                continue;
            }

            return ring.offer(value, remaining(deadline));
        }
    }

    fn poll(&self, timeout: Duration) -> Option<M> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let ring = self.read_ring();
            if let Some(value) = ring.try_poll_slot() {
                return Some(value);
            }
            if self.poll_resize() {
                continue;
            }

            let writer = self.write_ring();
            let sequence = writer.blocker().poll_sequence();
            // a grown ring gets new values on its own blocker
            if !RingQueue::is_empty(self) || (writer.is_write_closed() && !self.is_write_closed()) {
                continue;
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if !writer.blocker().poll_wait(sequence, remaining) {
                return None;
            }
        }
    }

    fn take(&self) -> QueueResult<M> {
        self.poll(Duration::MAX).ok_or(QueueError::Closed)
    }

    fn deliver(&self, handler: &mut dyn Deliver<M>, outbox: &mut Outbox<M>) -> usize {
        begin_batch(handler);

        let mut delivered = 0;
        loop {
            delivered += self.read_ring().drain(handler, outbox);
            if !self.poll_resize() {
                break;
            }
        }

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

        let mut delivered = 0;
        loop {
            let ring = self.read_ring();
            delivered += ring.drain_stage(handler, outbox, head_index, tail_index, next, is_tail);
            // only the tail stage knows the oldest ring is fully consumed
            if !(is_tail && self.poll_resize()) {
                break;
            }
        }

        end_batch(handler);
        delivered
    }

    fn close_write(&self) {
        self.write_closed.store(true, Ordering::Release);
        self.write_ring().close_write();
    }

    fn is_write_closed(&self) -> bool {
        self.write_closed.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.write_closed.store(true, Ordering::Release);
        for ring in self.rings.read().iter() {
            ring.shutdown();
        }
    }

    fn is_shutdown(&self) -> bool {
        self.write_ring().is_shutdown()
    }
}

impl<M: Send> std::fmt::Debug for ResizingRing<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rings = self.rings.read();
        let capacities: Vec<usize> = rings.iter().map(|ring| ring.capacity()).collect();
        f.debug_struct("ResizingRing")
            .field("max_capacity", &self.max_capacity)
            .field("rings", &capacities)
            .finish()
    }
}
