//! The agent loop: step scheduler, checkpoint/revert handling, stop policy.
//!
//! Grounded on `original_source/reagent/agent/loop.py`'s step cycle
//! (SPEC_FULL §4.7). Named `run` rather than `loop` — `loop` is a reserved
//! word in Rust and cannot name a module.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::cloudllm::config::AgentLoopConfig;
use crate::cloudllm::context::Context;
use crate::cloudllm::error::CoreError;
use crate::cloudllm::llm::provider::ChatProvider;
use crate::cloudllm::llm::streaming::{self, StepObserver, StepOutcome, StopReason};
use crate::cloudllm::message::Message;
use crate::cloudllm::tool::builtin::SendDMailTool;
use crate::cloudllm::tool::registry::ToolRegistry;
use crate::cloudllm::tool::{new_revert_slot, RevertSlot};
use crate::cloudllm::wire::{EventType, Wire};

use super::config::AgentConfig;

/// How a completed agent loop run ended. `MaxSteps` and a revert are
/// ordinary control flow, not errors — `BudgetExceeded` in SPEC_FULL §7 is
/// deliberately this variant rather than a `CoreError`.
pub enum AgentOutcome {
    Complete { final_text: String },
    MaxSteps,
    Error(CoreError),
}

/// Optional context-compaction hook (SPEC_FULL §4.9), invoked before a step
/// whose context is near the provider's window.
#[async_trait]
pub trait ContextManager: Send + Sync {
    /// Returns the action taken (`"pruned"`, `"compacted"`, `"pruned+compacted"`,
    /// or `"none"`), forwarded verbatim into the COMPACTION wire event.
    async fn auto_manage(&self, context: &mut Context) -> Result<String, CoreError>;
}

/// `crate::cloudllm::context_management::auto_manage` wired up behind the
/// [`ContextManager`] trait, with a cheap provider for the summary call.
pub struct DefaultContextManager {
    pub summary_provider: Arc<dyn ChatProvider>,
    pub context_window: usize,
}

#[async_trait]
impl ContextManager for DefaultContextManager {
    async fn auto_manage(&self, context: &mut Context) -> Result<String, CoreError> {
        crate::cloudllm::context_management::auto_manage(context, self.summary_provider.as_ref(), self.context_window).await
    }
}

/// Observer callbacks for one agent loop run (SPEC_FULL §4.7's "bundle of
/// observer callbacks"). Default methods are no-ops.
#[async_trait]
pub trait AgentLoopObserver: Send + Sync {
    async fn on_step_begin(&self, _step: usize, _agent: &str) {}
    async fn on_text(&self, _text: &str, _agent: &str) {}
    async fn on_thinking(&self, _text: &str, _agent: &str) {}
    async fn on_tool_call(&self, _id: &str, _name: &str, _arguments: &str, _agent: &str) {}
    async fn on_tool_result(&self, _id: &str, _name: &str, _content: &str, _is_error: bool, _agent: &str) {}
    async fn on_step(&self, _step: usize, _agent: &str, _tokens: usize) {}
    async fn on_dmail(&self, _checkpoint_id: u64, _message: &str, _agent: &str) {}
}

/// A no-op observer for callers that only care about the wire.
pub struct NoopAgentLoopObserver;

#[async_trait]
impl AgentLoopObserver for NoopAgentLoopObserver {}

/// Bridges [`StepObserver`] (text/thinking/tool-call chunk callbacks) to the
/// wire and the caller's [`AgentLoopObserver`], tagging every event with the
/// owning agent's name.
struct WireStepObserver<'a> {
    wire: Option<&'a Wire>,
    agent: &'a str,
    observer: &'a dyn AgentLoopObserver,
}

#[async_trait]
impl<'a> StepObserver for WireStepObserver<'a> {
    async fn on_text(&self, text: &str) {
        self.observer.on_text(text, self.agent).await;
        if let Some(wire) = self.wire {
            wire.send(EventType::Text, json!({"text": text, "agent": self.agent}));
        }
    }

    async fn on_thinking(&self, text: &str) {
        self.observer.on_thinking(text, self.agent).await;
        if let Some(wire) = self.wire {
            wire.send(EventType::Thinking, json!({"text": text, "agent": self.agent}));
        }
    }

    async fn on_tool_call(&self, id: &str, name: &str, arguments: &str) {
        self.observer.on_tool_call(id, name, arguments, self.agent).await;
        if let Some(wire) = self.wire {
            wire.send(EventType::ToolCall, json!({"id": id, "name": name, "arguments": arguments, "agent": self.agent}));
        }
    }
}

fn truncate_for_wire(content: &str) -> String {
    if content.chars().count() <= 500 {
        content.to_string()
    } else {
        content.chars().take(500).collect()
    }
}

/// Drives one agent (primary or subagent) through its step cycle against a
/// single [`Context`].
pub struct AgentLoop {
    config: AgentConfig,
    provider: Arc<dyn ChatProvider>,
    registry: ToolRegistry,
    wire: Option<Arc<Wire>>,
    context_manager: Option<Arc<dyn ContextManager>>,
    loop_config: AgentLoopConfig,
    revert_slot: RevertSlot,
}

impl AgentLoop {
    /// `registry` is the full, shared tool registry; this constructor
    /// subsets it to `config.allowed_tools` and, if `"dmail"` is among them,
    /// binds a fresh [`SendDMailTool`] to this loop's own revert slot (so
    /// nested subagent loops never share one another's D-Mail signal).
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        registry: &ToolRegistry,
        wire: Option<Arc<Wire>>,
        context_manager: Option<Arc<dyn ContextManager>>,
    ) -> Self {
        Self::with_loop_config(config, provider, registry, wire, context_manager, AgentLoopConfig::default())
    }

    pub fn with_loop_config(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        registry: &ToolRegistry,
        wire: Option<Arc<Wire>>,
        context_manager: Option<Arc<dyn ContextManager>>,
        loop_config: AgentLoopConfig,
    ) -> Self {
        let wants_dmail = config.allowed_tools.iter().any(|t| t == "dmail");
        let other_tools: Vec<String> = config.allowed_tools.iter().filter(|t| t.as_str() != "dmail").cloned().collect();
        let mut subset = registry.subset(&other_tools);

        let revert_slot = new_revert_slot();
        if wants_dmail {
            subset.register(Arc::new(SendDMailTool::new(revert_slot.clone())));
        }

        Self { config, provider, registry: subset, wire, context_manager, loop_config, revert_slot }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Runs the step cycle to completion against `context` (SPEC_FULL §4.7).
    pub async fn run(&self, context: &mut Context, observer: &dyn AgentLoopObserver) -> AgentOutcome {
        if let Some(wire) = &self.wire {
            wire.send(EventType::TurnBegin, json!({"agent": self.config.name}));
        }

        let outcome = self.run_inner(context, observer).await;

        if let Some(wire) = &self.wire {
            wire.send(EventType::TurnEnd, json!({"agent": self.config.name}));
        }
        outcome
    }

    async fn run_inner(&self, context: &mut Context, observer: &dyn AgentLoopObserver) -> AgentOutcome {
        let mut step_no: usize = 1;

        loop {
            if step_no > self.config.max_steps {
                return AgentOutcome::MaxSteps;
            }

            if context.estimate_tokens() + self.loop_config.reserve_tokens > self.provider.config().context_window {
                if let Some(manager) = &self.context_manager {
                    match manager.auto_manage(context).await {
                        Ok(action) => {
                            log::debug!("agent '{}' ran context management: {action}", self.config.name);
                            if let Some(wire) = &self.wire {
                                wire.send(EventType::Compaction, json!({"action": action}));
                            }
                        }
                        Err(e) => {
                            log::error!("agent '{}' context management failed: {e}", self.config.name);
                            return AgentOutcome::Error(e);
                        }
                    }
                }
            }

            let checkpoint_id = match context.checkpoint().await {
                Ok(id) => id,
                Err(e) => return AgentOutcome::Error(e),
            };
            log::debug!("agent '{}' step {step_no}: checkpoint {checkpoint_id}", self.config.name);

            observer.on_step_begin(step_no, &self.config.name).await;
            if let Some(wire) = &self.wire {
                wire.send(EventType::StepBegin, json!({"step": step_no, "agent": self.config.name}));
            }

            let step_observer = WireStepObserver { wire: self.wire.as_deref(), agent: &self.config.name, observer };
            let step_result = streaming::step(
                self.provider.as_ref(),
                &self.config.system_prompt,
                context.messages(),
                &self.registry,
                &self.revert_slot,
                &step_observer,
            )
            .await;

            let outcome = match step_result {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("agent '{}' step {step_no} failed: {e}", self.config.name);
                    if let Some(wire) = &self.wire {
                        wire.send(EventType::Error, json!({"error": e.to_string(), "agent": self.config.name}));
                    }
                    return AgentOutcome::Error(CoreError::FatalLoop(e.to_string()));
                }
            };

            match outcome {
                StepOutcome::Reverted { checkpoint_id: target, message } => {
                    observer.on_dmail(target, &message, &self.config.name).await;
                    if let Some(wire) = &self.wire {
                        wire.send(EventType::Dmail, json!({"checkpoint_id": target, "message": message, "agent": self.config.name}));
                    }
                    if let Err(e) = context.revert_to(target).await {
                        return AgentOutcome::Error(e);
                    }
                    let note = format!("[D-Mail from your future self]: {message}");
                    if let Err(e) = context.append(Message::system(note)).await {
                        return AgentOutcome::Error(e);
                    }
                    // The reverted step is re-attempted; the step counter does
                    // not advance (SPEC_FULL §4.7 step 5).
                    continue;
                }
                StepOutcome::Completed { assistant, tool_results, stop_reason, .. } => {
                    for ((id, name, _), result) in assistant.tool_calls().into_iter().zip(tool_results.iter()) {
                        if let Some(crate::cloudllm::message::ContentPart::ToolResult { content, is_error, .. }) = result.parts.first() {
                            observer.on_tool_result(id, name, content, *is_error, &self.config.name).await;
                            if let Some(wire) = &self.wire {
                                wire.send(
                                    EventType::ToolResult,
                                    json!({"id": id, "name": name, "content": truncate_for_wire(content), "is_error": is_error, "agent": self.config.name}),
                                );
                            }
                        }
                    }

                    let final_text = assistant.text();
                    if let Err(e) = context.grow(assistant, tool_results).await {
                        return AgentOutcome::Error(e);
                    }

                    observer.on_step(step_no, &self.config.name, context.estimate_tokens()).await;
                    if let Some(wire) = &self.wire {
                        wire.send(EventType::Status, json!({"tokens": context.estimate_tokens(), "agent": self.config.name}));
                    }

                    if stop_reason == StopReason::EndTurn {
                        return AgentOutcome::Complete { final_text };
                    }
                }
            }

            step_no += 1;
        }
    }
}
