//! Blocking support for ring producers and consumers
//!
//! The ring itself never takes a lock. Callers that choose to wait (a timed
//! offer on a full ring, a timed poll on an empty one) park here instead.
//! Each side has a sequence number: a waiter reads the sequence, re-checks the
//! ring, and only then sleeps until the sequence moves. A waker always bumps
//! the sequence, and only takes the lock when somebody is actually parked.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct WaitSide {
    sequence: AtomicU64,
    waiters: AtomicUsize,
    cond: Condvar,
}

#[derive(Default)]
pub struct RingBlocker {
    lock: Mutex<()>,
    offer: WaitSide,
    poll: WaitSide,
    closed: AtomicBool,
}

impl RingBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer_sequence(&self) -> u64 {
        self.offer.sequence.load(Ordering::SeqCst)
    }

    /// Parks a producer until a consumer frees space after `sequence` was read.
    ///
    /// Returns `false` when the timeout elapsed or the blocker was shut down.
    pub fn offer_wait(&self, sequence: u64, timeout: Duration) -> bool {
        self.wait(&self.offer, sequence, timeout)
    }

    pub fn offer_wake(&self) {
        self.wake(&self.offer);
    }

    pub fn poll_sequence(&self) -> u64 {
        self.poll.sequence.load(Ordering::SeqCst)
    }

    /// Parks a consumer until a producer stores a value after `sequence` was read.
    pub fn poll_wait(&self, sequence: u64, timeout: Duration) -> bool {
        self.wait(&self.poll, sequence, timeout)
    }

    pub fn poll_wake(&self) {
        self.wake(&self.poll);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases every parked caller; later waits return immediately.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.offer.cond.notify_all();
        self.poll.cond.notify_all();
    }

    fn wait(&self, side: &WaitSide, sequence: u64, timeout: Duration) -> bool {
        if timeout.is_zero() || self.is_closed() {
            return false;
        }

        // Duration::MAX overflows Instant; treat it as "no deadline"
        let deadline = Instant::now().checked_add(timeout);

        let mut guard = self.lock.lock();
        side.waiters.fetch_add(1, Ordering::SeqCst);

        let woken = loop {
            if side.sequence.load(Ordering::SeqCst) != sequence {
                break true;
            }
            if self.is_closed() {
                break false;
            }
            match deadline {
                Some(deadline) => {
                    if side.cond.wait_until(&mut guard, deadline).timed_out() {
                        break side.sequence.load(Ordering::SeqCst) != sequence;
                    }
                }
                None => side.cond.wait(&mut guard),
            }
        };

        side.waiters.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake(&self, side: &WaitSide) {
        side.sequence.fetch_add(1, Ordering::SeqCst);
        if side.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            side.cond.notify_all();
        }
    }
}

impl std::fmt::Debug for RingBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBlocker")
            .field("offer_sequence", &self.offer_sequence())
            .field("poll_sequence", &self.poll_sequence())
            .field("closed", &self.is_closed())
            .finish()
    }
}
