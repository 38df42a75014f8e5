//! Ring-buffer queues
//!
//! Bounded circular buffers that back every inbox. Producers claim a slot by
//! advancing a shared head counter with a compare-and-swap, then store the
//! value; consumers drain between their own counters without taking a lock
//! per batch.
//!
//! # Counter layout
//!
//! ```text
//!             counter[n] (tail)      counter[1]        counter[0] (head)
//!                   │                    │                    │
//!   ┌───┬───┬───┬───▼───┬───┬───┬───┬───▼───┬───┬───┬───┬───▼───┬───┐
//!   │   │   │   │ freed │ s1│ s1│ s1│ stage0│ s0│ s0│ s0│ empty │   │
//!   └───┴───┴───┴───────┴───┴───┴───┴───────┴───┴───┴───┴───────┴───┘
//!                  stage n-1 ...     stage 0 consumes [c1, c0)
//! ```
//!
//! A plain queue carries two counters, head and tail. A pipeline of `n`
//! stages carries `n + 1`: stage `i` consumes the range between counter
//! `i + 1` and counter `i`, so a slot only reaches stage `i + 1` after stage
//! `i` has seen it. Only the last stage removes values from their slots.
//!
//! # Variants
//!
//! - [`FixedRing`]: power-of-two capacity, never grows.
//! - [`ResizingRing`]: a chain of fixed rings that grows by 4x up to a
//!   maximum when writers find it full, and never shrinks.
//!
//! Both implement [`RingQueue`], the only surface the worker layer uses.

mod blocker;
mod counter;
pub mod error;
mod fixed;
mod resizing;
mod ring;

pub use blocker::RingBlocker;
pub use counter::CounterGroup;
pub use error::{QueueError, QueueResult};
pub use fixed::FixedRing;
pub use resizing::ResizingRing;
pub use ring::{Drain, RingQueue};

#[cfg(test)]
mod tests;
