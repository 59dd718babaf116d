//! Autonomous software-task conductor.
//!
//! This crate drives coding-agent backends through a per-project task queue
//! until every task is complete. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (stream normalization, session
//!   state, queue transitions, reconciliation). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (filesystem stores, process
//!   execution, engine detection). Isolated to enable mocking in tests.
//!
//! Orchestration modules ([`step`], [`looping`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
