//! I/O helpers for conductor commands.

pub mod config;
pub mod engine;
pub mod init;
pub mod process;
pub mod queue_store;
pub mod reconcile;
pub mod runner;
pub mod spec_record;
pub mod status;
