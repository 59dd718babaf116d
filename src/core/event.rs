//! Backend-agnostic event vocabulary for agent output streams.
//!
//! Every backend dialect is normalized into [`AgentEvent`] values. The raw
//! transcript file stays the source of truth; events are a lossy projection
//! meant for display, logging, and completion bookkeeping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One meaningful occurrence in an agent's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant-visible narrative output, appended to the running transcript.
    Text { content: String },
    /// Internal reasoning output, display-only.
    Thinking { content: String },
    /// An invoked action. `id` is unique per call within a run and is the
    /// dedup key for backends that re-emit the same call across lines.
    ToolCall {
        id: String,
        name: String,
        input: Value,
        /// Human-meaningful one-line summary of the call.
        detail: String,
    },
    /// Outcome of a prior tool call.
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    /// Backend signaled end of turn. Not authoritative for run completion;
    /// see [`crate::core::session::SessionState::is_complete`].
    Complete { reason: Option<String> },
    /// Backend-specific side information with no cross-backend shape.
    Metadata { data: Value },
}

/// Truncate `text` to at most `max` characters, appending an ellipsis when
/// anything was cut. Character-based so multi-byte input never splits.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
