//! LLM provider abstraction.
//!
//! Generalizes the teacher's `client_wrapper::ClientWrapper`
//! trait shape (`async_trait` + boxed `Stream`, `TokenUsage`) into the
//! normalized-chunk streaming contract of SPEC_FULL §4.6/§6, grounded on
//! `original_source/reagent/llm/provider.py`. Concrete vendor wire clients are
//! out of scope (§1 Non-goals); this crate ships the trait boundary and one
//! concrete, scriptable test double used by the agent loop's own tests.

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::cloudllm::message::{Message, TokenUsage};

/// A JSON-schema tool definition forwarded to the provider's native
/// function-calling API, derived from `crate::cloudllm::tool::ToolSpec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Json,
}

/// Static configuration for a provider instance.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
    /// Used by context management to compute the 70% compaction target
    /// (SPEC_FULL §4.9).
    pub context_window: usize,
    pub reasoning_effort: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: None,
            max_tokens: None,
            context_window: 200_000,
            reasoning_effort: None,
        }
    }
}

/// One incremental delta of a streamed tool-call argument, keyed by its
/// position in the assistant turn so fragments across chunks can be merged.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One extended-thinking block delta (SPEC_FULL §6): `thinking` text plus an
/// optional provider signature used for prompt-cache continuity.
#[derive(Debug, Clone, Default)]
pub struct ThinkingDelta {
    pub thinking: String,
    pub signature: Option<String>,
}

/// The incremental payload of one streamed chunk.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub thinking_blocks: Vec<ThinkingDelta>,
    pub tool_calls: Vec<ToolCallDelta>,
}

/// One normalized provider chunk, matching SPEC_FULL §6's wire shape.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub delta: Delta,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub type ProviderError = Box<dyn StdError + Send + Sync>;
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ProviderError>> + Send>>;

/// Marker wrapping network/timeout/OS-level provider failures (SPEC_FULL §7
/// kind 1). Only errors wrapped in this type are retried by `with_retry`;
/// a bare string/logical error is treated as non-transient.
#[derive(Debug)]
pub struct TransientProviderError(pub String);

impl fmt::Display for TransientProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient provider error: {}", self.0)
    }
}

impl StdError for TransientProviderError {}

/// Classifies a [`ProviderError`] as transient iff it carries a
/// [`TransientProviderError`] marker.
pub fn is_transient(error: &ProviderError) -> bool {
    error.downcast_ref::<TransientProviderError>().is_some()
}

/// Trait-driven abstraction for a concrete LLM backend.
///
/// Implementations must be `Send + Sync` so they can be shared across the
/// agent loop and any subagents dispatched concurrently.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    /// Streams a chat completion. `messages` excludes the system prompt,
    /// which is passed separately per the teacher's request-shaping
    /// convention.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChunkStream, ProviderError>;
}

/// A single programmed turn for [`ScriptedProvider`]: either a fixed sequence
/// of chunks to replay, or an error to surface on `stream`.
pub enum ScriptedTurn {
    Chunks(Vec<Chunk>),
    Error(String),
    /// An error wrapped in [`TransientProviderError`], for exercising retry.
    TransientError(String),
}

/// An in-memory, scriptable [`ChatProvider`] double. Each call to `stream`
/// consumes the next programmed turn in order; calling past the end repeats
/// the last turn so long-running loop tests don't need to over-provision.
///
/// This is the only concrete provider this crate ships (SPEC_FULL §4.6.1) —
/// real vendor wire clients live outside the core.
pub struct ScriptedProvider {
    config: ProviderConfig,
    turns: Mutex<Vec<ScriptedTurn>>,
    cursor: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(config: ProviderConfig, turns: Vec<ScriptedTurn>) -> Self {
        Self { config, turns: Mutex::new(turns), cursor: Mutex::new(0) }
    }

    /// Convenience for scripting a single plain-text, no-tool-call turn.
    pub fn single_text_reply(config: ProviderConfig, text: impl Into<String>) -> Self {
        let chunk = Chunk {
            delta: Delta { content: Some(text.into()), ..Default::default() },
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
        };
        Self::new(config, vec![ScriptedTurn::Chunks(vec![chunk])])
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn stream(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<ChunkStream, ProviderError> {
        let turns = self.turns.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(turns.len().saturating_sub(1));
        if *cursor < turns.len() {
            *cursor += 1;
        }

        match turns.get(idx) {
            None => Ok(Box::pin(stream::empty())),
            Some(ScriptedTurn::Error(msg)) => Err(msg.clone().into()),
            Some(ScriptedTurn::TransientError(msg)) => {
                Err(Box::new(TransientProviderError(msg.clone())))
            }
            Some(ScriptedTurn::Chunks(chunks)) => {
                let chunks = chunks.clone();
                Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
            }
        }
    }
}

/// Runs `attempt` up to 3 times with exponential backoff (1s, 2s, 4s, capped
/// at 30s) between tries, retrying only while `is_transient` returns true for
/// the error. Mirrors `original_source`'s `tenacity`-based retry around
/// `litellm.acompletion`.
pub async fn with_retry<T, E, F, Fut>(mut attempt: F, is_transient: impl Fn(&E) -> bool) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut delay = std::time::Duration::from_secs(1);
    let mut last_err = None;

    for attempt_num in 1..=MAX_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt_num == MAX_ATTEMPTS || !is_transient(&e) {
                    return Err(e);
                }
                log::warn!("transient provider error on attempt {attempt_num}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(std::time::Duration::from_secs(30));
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop always returns or sets last_err before exiting"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_provider_replays_programmed_turn() {
        let provider = ScriptedProvider::single_text_reply(ProviderConfig::default(), "hello there");
        let mut chunks = provider.stream("sys", &[], None).await.unwrap();
        let first = chunks.next().await.unwrap().unwrap();
        assert_eq!(first.delta.content.as_deref(), Some("hello there"));
        assert_eq!(first.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn scripted_provider_surfaces_programmed_error() {
        let provider = ScriptedProvider::new(
            ProviderConfig::default(),
            vec![ScriptedTurn::Error("connection reset".to_string())],
        );
        let result = provider.stream("sys", &[], None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_max_attempts() {
        let attempts = Mutex::new(0);
        let result: Result<(), &str> = with_retry(
            || async {
                *attempts.lock().unwrap() += 1;
                Err("transient")
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[test]
    fn is_transient_recognizes_marker_and_rejects_plain_errors() {
        let transient: ProviderError = Box::new(TransientProviderError("timeout".into()));
        assert!(is_transient(&transient));
        let plain: ProviderError = "bad request".into();
        assert!(!is_transient(&plain));
    }

    #[tokio::test]
    async fn with_retry_stops_immediately_on_non_transient() {
        let attempts = Mutex::new(0);
        let result: Result<(), &str> = with_retry(
            || async {
                *attempts.lock().unwrap() += 1;
                Err("fatal")
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(*attempts.lock().unwrap(), 1);
    }
}
