//! Conversation message model.
//!
//! Grounded on `original_source/reagent/llm/message.py`: a closed tagged union
//! of content parts rather than an inheritance hierarchy (SPEC_FULL §9), with
//! serialization flattening it into the stable field names used by the JSONL
//! persisted log (SPEC_FULL §6).

use serde::{Deserialize, Serialize};

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single piece of heterogeneous message content.
///
/// Invariant (b) of SPEC_FULL §3: within an assistant message, thinking parts
/// precede text, which precedes tool_calls. The agent loop constructs
/// assistant messages in that order; this type does not enforce it itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Opaque reasoning content. `signature` round-trips provider-specific
    /// thinking-block signatures (e.g. for prompt caching); absent for
    /// providers that don't emit one.
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        /// Raw JSON-encoded argument string, not yet parsed/validated. The
        /// tool registry parses and validates it at dispatch time.
        arguments: String,
    },
    /// Invariant (a): `tool_call_id` must reference a prior `ToolCall` part id
    /// in the same conversation. Invariant (c): a `Role::Tool` message carries
    /// exactly one `ToolResult` part.
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

/// Token accounting reported by an LLM provider for one `generate()` call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One entry in a [`crate::context::Context`]'s message sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// A tool-result message per invariant (c) — exactly one `ToolResult` part.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Concatenates all `Text` parts; used for previews and final-answer
    /// extraction (e.g. the subagent dispatch result in §4.10).
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls present on an assistant message, in emission order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &str)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, name, arguments } => {
                    Some((id.as_str(), name.as_str(), arguments.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::ToolCall { .. }))
    }

    /// Approximate serialized size in bytes, used by [`crate::context::Context::estimate_tokens`].
    pub fn approx_byte_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
