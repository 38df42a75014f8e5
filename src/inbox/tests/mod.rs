//! Test modules for inboxes
//!
//! Lifecycle and policy units first, then whole inboxes over each worker
//! shape. Shared handlers and message types live in `support`.

mod inbox;
mod support;
