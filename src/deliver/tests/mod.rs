//! Test modules for workers and delivery
//!
//! Organized by worker shape, with shared fixtures in `support`.

mod support;
