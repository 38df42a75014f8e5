//! Test modules for the ring queues
//!
//! Organized by functional area; `support` holds the collecting handler.

mod staged;
mod support;
