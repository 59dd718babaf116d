//! Parser for the timestamp-prefixed plain-text dialect.
//!
//! Lines look like `[2024-01-21T10:00:00] <subtype> <payload>`. Known
//! subtypes map to events; anything else is carried as metadata. Lines with
//! no timestamp prefix are continuation text from the previous message.

use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::core::event::{AgentEvent, truncate};

const COMMAND_DETAIL_LIMIT: usize = 80;

/// Tool name used for synthesized shell-execution calls.
pub const SHELL_TOOL_NAME: &str = "shell";

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?)\] ?(.*)$").unwrap()
});

/// Parse one raw stdout line into normalized events.
pub fn parse_line(line: &str) -> Vec<AgentEvent> {
    let Some(caps) = LINE_RE.captures(line.trim_end_matches(['\r', '\n'])) else {
        if line.trim().is_empty() {
            return Vec::new();
        }
        // Continuation of the previous message; keep the line break so the
        // accumulated transcript stays readable.
        return vec![AgentEvent::Text {
            content: format!("{}\n", line.trim_end_matches(['\r', '\n'])),
        }];
    };
    let timestamp = &caps[1];
    let rest = &caps[2];
    let (subtype, payload) = match rest.split_once(' ') {
        Some((subtype, payload)) => (subtype, payload.trim()),
        None => (rest, ""),
    };

    match subtype {
        "thinking" => vec![AgentEvent::Thinking {
            content: payload.to_string(),
        }],
        "codex" => vec![AgentEvent::Text {
            content: format!("{payload}\n"),
        }],
        "exec" => vec![AgentEvent::ToolCall {
            id: exec_call_id(timestamp, payload),
            name: SHELL_TOOL_NAME.to_string(),
            input: json!({ "command": payload }),
            detail: truncate(payload, COMMAND_DETAIL_LIMIT),
        }],
        "tokens" => vec![AgentEvent::Metadata {
            data: json!({ "kind": "tokens", "usage": payload }),
        }],
        other => vec![AgentEvent::Metadata {
            data: json!({ "kind": other, "raw": payload }),
        }],
    }
}

/// Deterministic id for a synthesized exec tool call.
///
/// The dialect carries no call ids, so one is derived from the timestamp and
/// command text. Re-emitted lines map to the same id and dedup downstream.
fn exec_call_id(timestamp: &str, payload: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    payload.hash(&mut hasher);
    format!("exec-{timestamp}-{:016x}", hasher.finish())
}
