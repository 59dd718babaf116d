//! Stable exit codes for conductor CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/queue state or other errors.
pub const INVALID: i32 = 1;
/// `conductor step`/`conductor run` found nothing queued.
pub const COMPLETE: i32 = 2;
/// A session failed or a task exhausted its budget.
pub const FAILED: i32 = 3;
