//! Tool contract and registry.
//!
//! Generalizes the teacher's `tool_protocol.rs` multi-protocol abstraction
//! down to the single schema-validated contract of SPEC_FULL §4.5, grounded
//! on `original_source/reagent/tool/base.py`'s `BaseTool`.

pub mod builtin;
pub mod registry;
pub mod truncation;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as Json;

/// A pending request to rewind context to an earlier checkpoint, raised by
/// the `dmail` tool. Rust has no `BaseException`-vs-`Exception` split to
/// smuggle this past a generic error handler, so it travels out-of-band
/// through a slot shared between the tool and the agent loop rather than as
/// a `ToolResult` variant — the loop checks the slot after each dispatch and
/// takes over control flow instead of treating this as a normal tool result.
#[derive(Debug, Clone)]
pub struct RevertSignal {
    pub checkpoint_id: u64,
    pub message: String,
}

/// Shared slot a `dmail` tool writes into and the agent loop polls.
pub type RevertSlot = Arc<Mutex<Option<RevertSignal>>>;

pub fn new_revert_slot() -> RevertSlot {
    Arc::new(Mutex::new(None))
}

/// The outcome of one tool execution, pre-truncation.
#[derive(Debug, Clone)]
pub enum ToolResult {
    Ok { output: String, brief: String },
    Err { output: String, brief: String },
    Rejected,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        ToolResult::Ok { output: output.into(), brief: String::new() }
    }

    pub fn ok_with_brief(output: impl Into<String>, brief: impl Into<String>) -> Self {
        ToolResult::Ok { output: output.into(), brief: brief.into() }
    }

    pub fn err(output: impl Into<String>) -> Self {
        ToolResult::Err { output: output.into(), brief: String::new() }
    }

    pub fn err_with_brief(output: impl Into<String>, brief: impl Into<String>) -> Self {
        ToolResult::Err { output: output.into(), brief: brief.into() }
    }

    /// `(content, is_error)`, the shape appended to context as a tool result.
    pub fn into_content(self) -> (String, bool) {
        match self {
            ToolResult::Ok { output, .. } => (output, false),
            ToolResult::Err { output, .. } => (output, true),
            ToolResult::Rejected => ("Tool call was rejected by the user.".to_string(), true),
        }
    }
}

/// A tool specification suitable for sending to an LLM provider's native
/// function-calling API (SPEC_FULL §6: `{type:"function", function:{...}}`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Json,
}

/// A registered, invocable tool. Implementations declare their own
/// parameter schema and perform validation/parsing from the raw JSON blob
/// themselves inside `execute` — the registry only forwards the blob.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Json;

    /// Validates `arguments` and executes. Implementations should return
    /// `ToolResult::Err` rather than panicking on invalid input; the
    /// registry additionally guards against panics (SPEC_FULL §4.5).
    async fn execute(&self, arguments: Json) -> ToolResult;
}
