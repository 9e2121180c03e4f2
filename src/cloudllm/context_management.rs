//! Context pruning and compaction (SPEC_FULL §4.9).
//!
//! Grounded on `original_source/reagent/context/management.py`. `prune` is a
//! cheap, local edit; `compact` costs one LLM call. `auto_manage` composes
//! both against a token budget and reports which ran, for the COMPACTION
//! wire event.

use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::llm::provider::ChatProvider;
use crate::cloudllm::llm::streaming::{generate, NoopStepObserver};
use crate::cloudllm::message::{ContentPart, Message};

use super::context::Context;

pub const PRUNE_THRESHOLD_CHARS: usize = 500;
pub const PRUNE_KEEP_RECENT: usize = 10;
pub const COMPACT_KEEP_RECENT: usize = 6;
pub const COMPACT_TARGET_FRACTION: f64 = 0.7;

/// Replaces oversized tool_result parts with a `[pruned: N chars]` stub and
/// drops thinking parts, exempting the most recent `keep_recent` messages.
/// Returns whether anything changed.
pub fn prune(context: &mut Context, keep_recent: usize) -> bool {
    let len = context.messages().len();
    let boundary = len.saturating_sub(keep_recent);
    let mut changed = false;

    for message in &mut context.messages_mut()[..boundary] {
        let mut kept = Vec::with_capacity(message.parts.len());
        for part in message.parts.drain(..) {
            match part {
                ContentPart::Thinking { .. } => changed = true,
                ContentPart::ToolResult { tool_call_id, content, is_error } if content.len() > PRUNE_THRESHOLD_CHARS => {
                    changed = true;
                    kept.push(ContentPart::ToolResult {
                        tool_call_id,
                        content: format!("[pruned: {} chars]", content.len()),
                        is_error,
                    });
                }
                other => kept.push(other),
            }
        }
        message.parts = kept;
    }

    changed
}

fn render_for_summary(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let mut line = format!("[{:?}]", m.role).to_lowercase();
            for part in &m.parts {
                match part {
                    ContentPart::Text { text } => line.push_str(&format!(" {text}")),
                    ContentPart::Thinking { text, .. } => line.push_str(&format!(" (thinking: {text})")),
                    ContentPart::ToolCall { name, arguments, .. } => {
                        line.push_str(&format!(" (called {name} with {arguments})"))
                    }
                    ContentPart::ToolResult { content, is_error, .. } => {
                        line.push_str(&format!(" (result{}: {content})", if *is_error { " [error]" } else { "" }))
                    }
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarizes all but the last `keep_recent` messages via a single
/// low-temperature LLM call and replaces them with one system message.
/// Returns whether anything changed (a no-op if there's nothing to compact).
pub async fn compact(context: &mut Context, summary_provider: &dyn ChatProvider, keep_recent: usize) -> CoreResult<bool> {
    let len = context.messages().len();
    if len <= keep_recent {
        return Ok(false);
    }
    let boundary = len - keep_recent;
    let transcript = render_for_summary(&context.messages()[..boundary]);

    const SUMMARY_PROMPT: &str = "Summarize the following conversation concisely, preserving \
        concrete facts, findings, and decisions a future agent would need. Do not add commentary \
        or mention that you are summarizing.";
    let seed = vec![Message::user(transcript)];
    let output = generate(summary_provider, SUMMARY_PROMPT, &seed, None, &NoopStepObserver)
        .await
        .map_err(|e| CoreError::Persistence(format!("compaction summary call failed: {e}")))?;

    let mut replacement = Vec::with_capacity(keep_recent + 1);
    replacement.push(Message::system(format!(
        "[Compacted summary of {boundary} earlier messages]\n{}",
        output.message.text()
    )));
    replacement.extend_from_slice(&context.messages()[boundary..]);

    context.replace_all(replacement).await?;
    Ok(true)
}

/// Prunes, then compacts if still over `target_fraction * context_window`.
/// Returns the action taken, for the COMPACTION wire event's `action` field.
pub async fn auto_manage(
    context: &mut Context,
    summary_provider: &dyn ChatProvider,
    context_window: usize,
) -> CoreResult<String> {
    let target = (context_window as f64 * COMPACT_TARGET_FRACTION) as usize;

    let mut pruned = false;
    if context.estimate_tokens() > target {
        pruned = prune(context, PRUNE_KEEP_RECENT);
        if pruned {
            context.recompute_token_count();
            context.rewrite().await?;
        }
    }

    let mut compacted = false;
    if context.estimate_tokens() > target {
        compacted = compact(context, summary_provider, COMPACT_KEEP_RECENT).await?;
    }

    let action = match (pruned, compacted) {
        (true, true) => "pruned+compacted",
        (true, false) => "pruned",
        (false, true) => "compacted",
        (false, false) => "none",
    };
    log::debug!("context management: {action} (target {target} tokens, window {context_window})");
    Ok(action.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::llm::provider::{ProviderConfig, ScriptedProvider};

    fn big_tool_result(n: usize) -> Message {
        Message::tool_result("t1", "x".repeat(n), false)
    }

    #[test]
    fn prune_stubs_large_tool_results_outside_recent_window() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut ctx = rt.block_on(Context::create(dir.path().join("ctx.jsonl"))).unwrap();
        for _ in 0..15 {
            rt.block_on(ctx.append(big_tool_result(1000))).unwrap();
        }
        let changed = prune(&mut ctx, 10);
        assert!(changed);
        match &ctx.messages()[0].parts[0] {
            ContentPart::ToolResult { content, .. } => assert!(content.starts_with("[pruned:")),
            other => panic!("unexpected part: {other:?}"),
        }
        match &ctx.messages()[14].parts[0] {
            ContentPart::ToolResult { content, .. } => assert_eq!(content.len(), 1000),
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[test]
    fn prune_drops_thinking_parts_outside_recent_window() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut ctx = rt.block_on(Context::create(dir.path().join("ctx.jsonl"))).unwrap();
        let msg = Message {
            role: crate::cloudllm::message::Role::Assistant,
            parts: vec![ContentPart::Thinking { text: "hmm".into(), signature: None }, ContentPart::Text { text: "ok".into() }],
        };
        rt.block_on(ctx.append(msg)).unwrap();
        for _ in 0..10 {
            rt.block_on(ctx.append(Message::user("filler"))).unwrap();
        }
        prune(&mut ctx, 10);
        assert_eq!(ctx.messages()[0].parts.len(), 1);
    }

    #[tokio::test]
    async fn compact_replaces_old_messages_with_one_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::create(dir.path().join("ctx.jsonl")).await.unwrap();
        for i in 0..20 {
            ctx.append(Message::user(format!("message {i}"))).await.unwrap();
        }
        let provider = ScriptedProvider::single_text_reply(ProviderConfig::default(), "summary text");
        let changed = compact(&mut ctx, &provider, 6).await.unwrap();
        assert!(changed);
        assert_eq!(ctx.messages().len(), 7);
        assert!(ctx.messages()[0].text().contains("summary text"));
    }

    #[tokio::test]
    async fn compact_is_noop_when_under_keep_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::create(dir.path().join("ctx.jsonl")).await.unwrap();
        ctx.append(Message::user("hi")).await.unwrap();
        let provider = ScriptedProvider::single_text_reply(ProviderConfig::default(), "summary");
        let changed = compact(&mut ctx, &provider, 6).await.unwrap();
        assert!(!changed);
        assert_eq!(ctx.messages().len(), 1);
    }

    #[tokio::test]
    async fn auto_manage_reports_none_when_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::create(dir.path().join("ctx.jsonl")).await.unwrap();
        ctx.append(Message::user("hi")).await.unwrap();
        let provider = ScriptedProvider::single_text_reply(ProviderConfig::default(), "summary");
        let action = auto_manage(&mut ctx, &provider, 200_000).await.unwrap();
        assert_eq!(action, "none");
    }
}
