//! Parser for the structured stream-json dialect.
//!
//! Each stdout line is a JSON record carrying a `type` discriminator
//! (`assistant`/`user`/`result`/`system`) with nested content blocks. Lines
//! that fail to parse as JSON are retried against the timestamped dialect in
//! [`crate::core::codex`] so interleaved plain-text output is not lost.

use serde_json::Value;

use crate::core::codex;
use crate::core::event::{AgentEvent, truncate};

const COMMAND_DETAIL_LIMIT: usize = 80;
const INPUT_DETAIL_LIMIT: usize = 60;
const TOOL_RESULT_LIMIT: usize = 500;

/// Parse one raw stdout line into normalized events.
///
/// Pure and stateless; dedup and transcript accumulation belong to the
/// consuming [`crate::core::session::SessionState`].
pub fn parse_line(line: &str) -> Vec<AgentEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let Ok(record) = serde_json::from_str::<Value>(trimmed) else {
        return codex::parse_line(line);
    };
    parse_record(&record)
}

fn parse_record(record: &Value) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    match record.get("type").and_then(Value::as_str) {
        Some("assistant") => {
            collect_content_blocks(record.get("message"), &mut events);
        }
        Some("user") => {
            collect_content_blocks(record.get("message"), &mut events);
        }
        Some("result") => {
            // Older CLI versions nest trailing text under `result` or `message`.
            let body = record.get("result").or_else(|| record.get("message"));
            match body {
                Some(Value::String(text)) if !text.is_empty() => {
                    events.push(AgentEvent::Text {
                        content: text.clone(),
                    });
                }
                Some(body @ Value::Object(_)) => {
                    collect_blocks_from(body, &mut events);
                }
                _ => {}
            }
            let reason = record
                .get("subtype")
                .and_then(Value::as_str)
                .map(str::to_string);
            events.push(AgentEvent::Complete { reason });
        }
        Some("system") => {
            events.push(AgentEvent::Metadata {
                data: record.clone(),
            });
        }
        _ => {}
    }
    events
}

fn collect_content_blocks(message: Option<&Value>, events: &mut Vec<AgentEvent>) {
    if let Some(message) = message {
        collect_blocks_from(message, events);
    }
}

fn collect_blocks_from(container: &Value, events: &mut Vec<AgentEvent>) {
    let Some(blocks) = container.get("content").and_then(Value::as_array) else {
        return;
    };
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    events.push(AgentEvent::Text {
                        content: text.to_string(),
                    });
                }
            }
            Some("thinking") => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    events.push(AgentEvent::Thinking {
                        content: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                let detail = tool_detail(&name, &input);
                events.push(AgentEvent::ToolCall {
                    id,
                    name,
                    input,
                    detail,
                });
            }
            Some("tool_result") => {
                let tool_use_id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let is_error = block
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let content = render_result_content(block.get("content"));
                events.push(AgentEvent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                });
            }
            _ => {}
        }
    }
}

/// Render tool-result content for display, truncated to a bounded length.
///
/// Content arrives either as a plain string or as a list of text blocks.
fn render_result_content(content: Option<&Value>) -> String {
    let rendered = match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    truncate(&rendered, TOOL_RESULT_LIMIT)
}

/// Extract a human-meaningful summary for a tool call, deterministically.
///
/// Recognized tools get a purpose-built summary (file path, truncated shell
/// command, search pattern plus target). Unrecognized tools fall back to the
/// `description` input field or a truncated JSON rendering of the input.
pub fn tool_detail(name: &str, input: &Value) -> String {
    let str_field = |key: &str| {
        input
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    match name {
        "Read" => str_field("file_path"),
        "Grep" => {
            let pattern = str_field("pattern");
            let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
            format!("pattern={pattern:?} in {path}")
        }
        "Glob" => str_field("pattern"),
        "Bash" => truncate(&str_field("command"), COMMAND_DETAIL_LIMIT),
        "Task" => str_field("description"),
        _ => {
            let description = str_field("description");
            if !description.is_empty() {
                description
            } else {
                truncate(&input.to_string(), INPUT_DETAIL_LIMIT)
            }
        }
    }
}
