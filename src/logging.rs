//! Development-time tracing for debugging the conductor.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. Session
//! transcripts under `.conductor/sessions/` are product artifacts and are
//! written regardless of the tracing filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset. Output: stderr, compact
/// format.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
