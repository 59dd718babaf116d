//! Caller-held accumulation over parsed events.
//!
//! Dedup lives here rather than in the dialect parsers: parsers stay pure
//! per-line functions, while this state tracks what the whole run has already
//! produced. Some backends re-send growing prefixes of the same message
//! across lines, so naive concatenation would duplicate content.

use std::collections::HashSet;

use crate::core::event::AgentEvent;

/// Accumulated state for one agent run.
#[derive(Debug)]
pub struct SessionState {
    completion_marker: String,
    transcript: String,
    seen_tool_ids: HashSet<String>,
    complete_reason: Option<String>,
    saw_complete: bool,
}

impl SessionState {
    pub fn new(completion_marker: impl Into<String>) -> Self {
        Self {
            completion_marker: completion_marker.into(),
            transcript: String::new(),
            seen_tool_ids: HashSet::new(),
            complete_reason: None,
            saw_complete: false,
        }
    }

    /// Fold newly parsed events into the session, returning only the accepted
    /// (deduplicated) events in arrival order.
    ///
    /// - `Text` already contained in the transcript is suppressed.
    /// - `ToolCall` with a previously seen id is suppressed.
    /// - Only the first `Complete` is kept as authoritative.
    pub fn ingest(&mut self, events: Vec<AgentEvent>) -> Vec<AgentEvent> {
        let mut accepted = Vec::new();
        for event in events {
            match event {
                AgentEvent::Text { content } => {
                    if content.is_empty() || self.transcript.contains(&content) {
                        continue;
                    }
                    self.transcript.push_str(&content);
                    accepted.push(AgentEvent::Text { content });
                }
                AgentEvent::ToolCall {
                    id,
                    name,
                    input,
                    detail,
                } => {
                    if !self.seen_tool_ids.insert(id.clone()) {
                        continue;
                    }
                    accepted.push(AgentEvent::ToolCall {
                        id,
                        name,
                        input,
                        detail,
                    });
                }
                AgentEvent::Complete { reason } => {
                    if self.saw_complete {
                        continue;
                    }
                    self.saw_complete = true;
                    self.complete_reason = reason.clone();
                    accepted.push(AgentEvent::Complete { reason });
                }
                other => accepted.push(other),
            }
        }
        accepted
    }

    /// Accumulated assistant-visible text.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Whether the backend emitted an end-of-turn record.
    pub fn saw_complete(&self) -> bool {
        self.saw_complete
    }

    /// Reason from the first `Complete` event, if any.
    pub fn complete_reason(&self) -> Option<&str> {
        self.complete_reason.as_deref()
    }

    /// Suffix-anchored completion check.
    ///
    /// True only when the accumulated text, after trimming trailing
    /// whitespace, ends with the completion marker. A marker discussed
    /// mid-response does not count.
    pub fn is_complete(&self) -> bool {
        !self.completion_marker.is_empty()
            && self
                .transcript
                .trim_end()
                .ends_with(&self.completion_marker)
    }
}
