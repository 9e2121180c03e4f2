//! Chunk assembly (`generate`) and concurrent tool dispatch (`step`).
//!
//! Grounded on `original_source/reagent/llm/streaming.py`. `generate` folds a
//! [`ChunkStream`] into one assistant [`Message`], preserving the
//! thinking-before-text-before-tool_calls ordering invariant of SPEC_FULL §3.
//! `step` wraps it and fans tool calls out concurrently through a
//! [`ToolRegistry`], watching the shared [`RevertSlot`] for a D-Mail request.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value as Json;

use crate::cloudllm::message::{ContentPart, Message, Role, TokenUsage};
use crate::cloudllm::tool::registry::ToolRegistry;
use crate::cloudllm::tool::{RevertSlot, ToolSpec};

use super::provider::{is_transient, ChatProvider, ProviderError, ToolDefinition, with_retry};

/// Live callbacks fired while `generate` folds a chunk stream. Default
/// methods are no-ops, matching the teacher's `EventHandler` convention of a
/// trait with optional overrides rather than a struct of `Option<Fn>` fields.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_text(&self, _text: &str) {}
    async fn on_thinking(&self, _text: &str) {}
    async fn on_tool_call(&self, _id: &str, _name: &str, _arguments: &str) {}
}

/// A [`StepObserver`] that does nothing; used where no caller-supplied
/// callbacks are needed (e.g. a compaction summary call).
pub struct NoopStepObserver;

#[async_trait]
impl StepObserver for NoopStepObserver {}

#[derive(Debug, Clone, Default)]
struct ToolCallAccum {
    id: String,
    name: String,
    arguments: String,
}

/// The result of one `generate` call.
pub struct GenerateOutput {
    pub message: Message,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

pub fn tool_definitions(specs: &[ToolSpec]) -> Vec<ToolDefinition> {
    specs
        .iter()
        .map(|s| ToolDefinition {
            name: s.name.clone(),
            description: s.description.clone(),
            parameters_schema: s.parameters_schema.clone(),
        })
        .collect()
}

/// Opens a streaming call (retrying transient failures) and assembles the
/// chunks into one assistant [`Message`] (SPEC_FULL §4.6).
pub async fn generate(
    provider: &dyn ChatProvider,
    system_prompt: &str,
    messages: &[Message],
    tools: Option<&[ToolDefinition]>,
    observer: &dyn StepObserver,
) -> Result<GenerateOutput, ProviderError> {
    let mut stream = with_retry(|| provider.stream(system_prompt, messages, tools), is_transient).await?;

    let mut text = String::new();
    let mut thinking_parts: Vec<(String, Option<String>)> = Vec::new();
    let mut tool_calls: Vec<Option<ToolCallAccum>> = Vec::new();
    let mut usage = TokenUsage::default();
    let mut finish_reason = None;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result?;
        log::trace!("chunk delta: {:?}", chunk.delta);

        if let Some(content) = &chunk.delta.content {
            if !content.is_empty() {
                text.push_str(content);
                observer.on_text(content).await;
            }
        }
        if let Some(reasoning) = &chunk.delta.reasoning_content {
            if !reasoning.is_empty() {
                observer.on_thinking(reasoning).await;
                thinking_parts.push((reasoning.clone(), None));
            }
        }
        for block in &chunk.delta.thinking_blocks {
            observer.on_thinking(&block.thinking).await;
            thinking_parts.push((block.thinking.clone(), block.signature.clone()));
        }
        for delta in &chunk.delta.tool_calls {
            if tool_calls.len() <= delta.index {
                tool_calls.resize_with(delta.index + 1, || None);
            }
            let entry = tool_calls[delta.index].get_or_insert_with(ToolCallAccum::default);
            if let Some(id) = &delta.id {
                entry.id = id.clone();
            }
            if let Some(name) = &delta.name {
                entry.name = name.clone();
            }
            if let Some(arguments) = &delta.arguments {
                entry.arguments.push_str(arguments);
            }
        }
        if let Some(reason) = &chunk.finish_reason {
            finish_reason = Some(reason.clone());
        }
        if let Some(chunk_usage) = &chunk.usage {
            usage.add(chunk_usage);
        }

        // Yield between chunks so concurrent consumers of the wire/UI make
        // progress (SPEC_FULL §4.6, §5 suspension point (a)).
        tokio::task::yield_now().await;
    }

    let mut parts = Vec::new();
    for (thinking, signature) in thinking_parts {
        parts.push(ContentPart::Thinking { text: thinking, signature });
    }
    if !text.is_empty() {
        parts.push(ContentPart::Text { text });
    }
    for entry in tool_calls.into_iter().flatten() {
        observer.on_tool_call(&entry.id, &entry.name, &entry.arguments).await;
        parts.push(ContentPart::ToolCall { id: entry.id, name: entry.name, arguments: entry.arguments });
    }

    Ok(GenerateOutput { message: Message { role: Role::Assistant, parts }, usage, finish_reason })
}

/// `stop_reason` reported by [`StepOutcome::Completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ToolCalls,
    EndTurn,
}

/// The outcome of one `step` call. `Reverted` is a distinct variant rather
/// than an `Err` so the agent loop can match it explicitly before the error
/// path ever sees it (SPEC_FULL §9's D-Mail design note).
pub enum StepOutcome {
    Completed {
        assistant: Message,
        tool_results: Vec<Message>,
        usage: TokenUsage,
        stop_reason: StopReason,
    },
    Reverted {
        checkpoint_id: u64,
        message: String,
    },
}

/// Calls `generate`, then — if the assistant message carries tool calls —
/// dispatches all of them concurrently via `registry`, preserving emission
/// order in the returned `tool_results` regardless of completion order
/// (SPEC_FULL §8 property 4).
pub async fn step(
    provider: &dyn ChatProvider,
    system_prompt: &str,
    messages: &[Message],
    registry: &ToolRegistry,
    revert_slot: &RevertSlot,
    observer: &dyn StepObserver,
) -> Result<StepOutcome, ProviderError> {
    let defs = tool_definitions(&registry.specs(None));
    let tools = if defs.is_empty() { None } else { Some(defs.as_slice()) };

    let GenerateOutput { message, usage, .. } =
        generate(provider, system_prompt, messages, tools, observer).await?;

    let calls: Vec<(String, String, String)> = message
        .tool_calls()
        .into_iter()
        .map(|(id, name, args)| (id.to_string(), name.to_string(), args.to_string()))
        .collect();

    if calls.is_empty() {
        return Ok(StepOutcome::Completed {
            assistant: message,
            tool_results: Vec::new(),
            usage,
            stop_reason: StopReason::EndTurn,
        });
    }

    log::debug!("dispatching {} tool call(s): {:?}", calls.len(), calls.iter().map(|(_, n, _)| n).collect::<Vec<_>>());
    let dispatches = calls.iter().map(|(id, name, arguments)| {
        let arguments: Json = serde_json::from_str(arguments).unwrap_or(Json::Null);
        async move {
            let (content, is_error) = registry.dispatch(name, arguments).await;
            (id.clone(), content, is_error)
        }
    });
    let results = futures_util::future::join_all(dispatches).await;
    log::debug!("tool dispatch complete: {} result(s)", results.len());

    if let Some(signal) = revert_slot.lock().unwrap().take() {
        return Ok(StepOutcome::Reverted { checkpoint_id: signal.checkpoint_id, message: signal.message });
    }

    let tool_results = results
        .into_iter()
        .map(|(id, content, is_error)| Message::tool_result(id, content, is_error))
        .collect();

    Ok(StepOutcome::Completed { assistant: message, tool_results, usage, stop_reason: StopReason::ToolCalls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::llm::provider::{Chunk, Delta, ProviderConfig, ScriptedProvider, ScriptedTurn, ThinkingDelta, ToolCallDelta};
    use crate::cloudllm::tool::builtin::ThinkTool;
    use crate::cloudllm::tool::new_revert_slot;
    use std::sync::Arc;

    #[tokio::test]
    async fn generate_orders_thinking_before_text_before_tool_calls() {
        let chunk = Chunk {
            delta: Delta {
                content: Some("answer".to_string()),
                reasoning_content: None,
                thinking_blocks: vec![ThinkingDelta { thinking: "pondering".to_string(), signature: None }],
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("t1".to_string()),
                    name: Some("think".to_string()),
                    arguments: Some("{}".to_string()),
                }],
            },
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
        };
        let provider = ScriptedProvider::new(ProviderConfig::default(), vec![ScriptedTurn::Chunks(vec![chunk])]);
        let output = generate(&provider, "sys", &[], None, &NoopStepObserver).await.unwrap();

        match &output.message.parts[..] {
            [ContentPart::Thinking { .. }, ContentPart::Text { .. }, ContentPart::ToolCall { .. }] => {}
            other => panic!("unexpected part order: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_accumulates_fragmented_tool_call_arguments() {
        let make_delta = |fragment: &str| ToolCallDelta {
            index: 0,
            id: if fragment == "{\"a\":" { Some("t1".to_string()) } else { None },
            name: if fragment == "{\"a\":" { Some("echo".to_string()) } else { None },
            arguments: Some(fragment.to_string()),
        };
        let chunks = vec![
            Chunk { delta: Delta { tool_calls: vec![make_delta("{\"a\":")], ..Default::default() }, finish_reason: None, usage: None },
            Chunk { delta: Delta { tool_calls: vec![make_delta("1}")], ..Default::default() }, finish_reason: Some("tool_calls".into()), usage: None },
        ];
        let provider = ScriptedProvider::new(ProviderConfig::default(), vec![ScriptedTurn::Chunks(chunks)]);
        let output = generate(&provider, "sys", &[], None, &NoopStepObserver).await.unwrap();
        let calls = output.message.tool_calls();
        assert_eq!(calls, vec![("t1", "echo", "{\"a\":1}")]);
    }

    #[tokio::test]
    async fn step_returns_end_turn_with_no_tool_calls() {
        let provider = ScriptedProvider::single_text_reply(ProviderConfig::default(), "done");
        let registry = ToolRegistry::new();
        let outcome = step(&provider, "sys", &[], &registry, &new_revert_slot(), &NoopStepObserver).await.unwrap();
        match outcome {
            StepOutcome::Completed { stop_reason, tool_results, .. } => {
                assert_eq!(stop_reason, StopReason::EndTurn);
                assert!(tool_results.is_empty());
            }
            StepOutcome::Reverted { .. } => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn step_preserves_tool_call_order_regardless_of_completion_speed() {
        let chunk = Chunk {
            delta: Delta {
                tool_calls: vec![
                    ToolCallDelta { index: 0, id: Some("t1".into()), name: Some("think".into()), arguments: Some("{\"thought\":\"a\"}".into()) },
                    ToolCallDelta { index: 1, id: Some("t2".into()), name: Some("think".into()), arguments: Some("{\"thought\":\"b\"}".into()) },
                ],
                ..Default::default()
            },
            finish_reason: Some("tool_calls".into()),
            usage: None,
        };
        let provider = ScriptedProvider::new(ProviderConfig::default(), vec![ScriptedTurn::Chunks(vec![chunk])]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ThinkTool));

        let outcome = step(&provider, "sys", &[], &registry, &new_revert_slot(), &NoopStepObserver).await.unwrap();
        match outcome {
            StepOutcome::Completed { tool_results, .. } => {
                assert_eq!(tool_results.len(), 2);
                match &tool_results[0].parts[0] {
                    ContentPart::ToolResult { tool_call_id, .. } => assert_eq!(tool_call_id, "t1"),
                    other => panic!("unexpected part: {other:?}"),
                }
                match &tool_results[1].parts[0] {
                    ContentPart::ToolResult { tool_call_id, .. } => assert_eq!(tool_call_id, "t2"),
                    other => panic!("unexpected part: {other:?}"),
                }
            }
            StepOutcome::Reverted { .. } => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn step_detects_revert_signal_from_dmail_tool() {
        use crate::cloudllm::tool::builtin::SendDMailTool;

        let chunk = Chunk {
            delta: Delta {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("t1".into()),
                    name: Some("dmail".into()),
                    arguments: Some("{\"checkpoint_id\":2,\"message\":\"try again\"}".into()),
                }],
                ..Default::default()
            },
            finish_reason: Some("tool_calls".into()),
            usage: None,
        };
        let provider = ScriptedProvider::new(ProviderConfig::default(), vec![ScriptedTurn::Chunks(vec![chunk])]);
        let slot = new_revert_slot();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SendDMailTool::new(slot.clone())));

        let outcome = step(&provider, "sys", &[], &registry, &slot, &NoopStepObserver).await.unwrap();
        match outcome {
            StepOutcome::Reverted { checkpoint_id, message } => {
                assert_eq!(checkpoint_id, 2);
                assert_eq!(message, "try again");
            }
            StepOutcome::Completed { .. } => panic!("expected Reverted"),
        }
    }
}
