//! Actor-style message delivery
//!
//! Messages are queued on lock-free rings and drained by workers that run
//! on an executor only while there is work. See [`inbox`] for the
//! addressable surface and [`deliver`] for worker shapes.

pub mod app;
pub mod core;
pub mod deliver;
pub mod inbox;
pub mod queue;

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Delivery API version from the build script, as a number.
pub fn get_api_version() -> u32 {
    DELIVER_API_VERSION.parse().unwrap_or(20260301)
}
