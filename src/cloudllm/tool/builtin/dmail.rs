//! The `dmail` tool: requests a rewind of context to an earlier checkpoint.
//!
//! Grounded on `original_source/reagent/tool/builtin/dmail.py`'s
//! `SendDMailTool`, which raises `BackToTheFuture(checkpoint_id, message)` —
//! a `BaseException` subclass deliberately outside the normal exception
//! hierarchy so `except Exception` handlers in tool dispatch never catch it.
//! Rust has no equivalent split, so this tool instead writes the request into
//! a [`RevertSlot`] shared with the agent loop (see [`super::super::RevertSignal`]).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::cloudllm::tool::{RevertSignal, RevertSlot, Tool, ToolResult};

#[derive(Debug, Deserialize)]
struct SendDMailParams {
    checkpoint_id: u64,
    message: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

/// Rare-use tool that rewinds the agent's context to a prior checkpoint.
/// Not rate-limited by the registry; naturally bounded because a reverted
/// step does not advance the agent loop's step counter.
pub struct SendDMailTool {
    slot: RevertSlot,
}

impl SendDMailTool {
    pub fn new(slot: RevertSlot) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl Tool for SendDMailTool {
    fn name(&self) -> &str {
        "dmail"
    }

    fn description(&self) -> &str {
        "Send a D-Mail: rewind the conversation to an earlier checkpoint, \
         discarding everything since, and leave a note for your future self \
         about what to do differently. Use sparingly."
    }

    fn parameters_schema(&self) -> Json {
        serde_json::json!({
            "type": "object",
            "properties": {
                "checkpoint_id": {
                    "type": "integer",
                    "description": "The checkpoint id to revert to."
                },
                "message": {
                    "type": "string",
                    "description": "Note to leave for your future self after the revert."
                },
                "reason": {
                    "type": "string",
                    "description": "Why this revert is necessary."
                }
            },
            "required": ["checkpoint_id", "message"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: SendDMailParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };

        let mut slot = self.slot.lock().unwrap();
        *slot = Some(RevertSignal {
            checkpoint_id: params.checkpoint_id,
            message: params.message,
        });
        drop(slot);

        ToolResult::ok_with_brief(
            "D-Mail sent. Context will revert to the requested checkpoint.",
            "Sending D-Mail...",
        )
    }
}
