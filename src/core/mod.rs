//! Deterministic, pure logic shared by the conductor core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod claude;
pub mod codex;
pub mod event;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod session;
