//! The `think` tool: a no-op scratchpad for model reasoning.
//!
//! Grounded on `original_source/reagent/tool/builtin/think.py`. Recording the
//! thought as a wire event is the caller's responsibility (the agent loop's
//! `on_tool_call`/`on_text` hooks), not this tool's — it only acknowledges.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::cloudllm::tool::{Tool, ToolResult};

#[derive(Debug, Deserialize)]
struct ThinkParams {
    #[allow(dead_code)]
    thought: String,
}

/// Gives the model an explicit place to reason out loud without taking any
/// action. Always succeeds.
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Record a thought. Use this to reason through a problem step by step \
         before acting, without taking any action yourself."
    }

    fn parameters_schema(&self) -> Json {
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The thought to record."
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: ThinkParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };
        let _ = params;
        ToolResult::ok_with_brief("Thought recorded.", "Thinking...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_acknowledges_thought() {
        let tool = ThinkTool;
        let result = tool.execute(serde_json::json!({"thought": "let's check the entry point"})).await;
        match result {
            ToolResult::Ok { output, .. } => assert_eq!(output, "Thought recorded."),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_rejects_missing_thought() {
        let tool = ThinkTool;
        let result = tool.execute(serde_json::json!({})).await;
        assert!(matches!(result, ToolResult::Err { .. }));
    }
}
