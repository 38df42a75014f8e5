//! Process-level services: configuration, logging, shutdown and error reporting

pub mod config;
pub mod error_handling;
pub mod logging;
pub mod shutdown;
