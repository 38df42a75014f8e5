use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use super::error::{QueueError, QueueResult};

/// Head and tail positions shared by the consumers of one ring.
///
/// Counter `0` is the producer head and the last counter is the ring tail,
/// the position up to which slots have been handed back to producers.
/// Every counter is padded to its own cache line since each one is written
/// by a different thread.
pub struct CounterGroup {
    counters: Box<[CachePadded<AtomicU64>]>,
}

impl CounterGroup {
    /// Creates `size` counters, all starting at `initial`.
    pub fn new(size: usize, initial: u64) -> QueueResult<Self> {
        if size < 2 {
            return Err(QueueError::InvalidCounterGroup { size });
        }

        let counters = (0..size)
            .map(|_| CachePadded::new(AtomicU64::new(initial)))
            .collect();

        Ok(Self { counters })
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Index of the ring tail (the last counter).
    pub fn tail_index(&self) -> usize {
        self.counters.len() - 1
    }

    pub fn get(&self, index: usize) -> u64 {
        self.counters[index].load(Ordering::Acquire)
    }

    pub fn set(&self, index: usize, value: u64) {
        self.counters[index].store(value, Ordering::Release);
    }

    pub fn compare_exchange(&self, index: usize, current: u64, next: u64) -> bool {
        self.counters[index]
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Sets bits on a counter, returning the previous value.
    pub(crate) fn fetch_or(&self, index: usize, bits: u64) -> u64 {
        self.counters[index].fetch_or(bits, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for CounterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values: Vec<u64> = (0..self.len()).map(|i| self.get(i)).collect();
        f.debug_struct("CounterGroup").field("counters", &values).finish()
    }
}
