//! Inboxes
//!
//! An [`Inbox`] is the addressable face of a worker: a ring queue, the
//! worker shape draining it, a lifecycle, and the policies that apply when
//! the queue is full. Messages implement [`InboxMessage`] so the inbox can
//! carry its own lifecycle signals through the queue; [`Mail`] is a ready
//! made envelope for arbitrary payloads.

mod adapter;
mod builder;
pub mod error;
mod full;
#[allow(clippy::module_inception)]
mod inbox;
mod lifecycle;
mod mail;
mod overflow;
mod signal;

pub use builder::InboxBuilder;
pub use error::{InboxError, InboxResult};
pub use full::{FatalAction, FullReport, QueueFullHandler, QueueFullPolicy};
pub use inbox::Inbox;
pub use lifecycle::{LifecycleGate, LifecycleState};
pub use mail::Mail;
pub use signal::{InboxMessage, InboxSignal, Latch};

#[cfg(test)]
mod tests;
