//! The `courier` command line application

pub mod bench;
pub mod cli;
pub mod startup;
