//! The orchestrator's two special tools: `dispatch_subagent`, which recurses
//! into a fresh, isolated agent loop, and `update_model`, which mutates the
//! shared knowledge model (SPEC_FULL §4.10).
//!
//! Grounded on `original_source/reagent/agent/orchestrator.py`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as Json};
use uuid::Uuid;

use super::agent::config::AgentRegistry;
use super::agent::run::{AgentLoop, AgentOutcome, ContextManager, NoopAgentLoopObserver};
use super::config::AgentLoopConfig;
use super::context::Context;
use super::knowledge::{Finding, Hypothesis, HypothesisStatus, KnowledgeModel, Observation, TargetInfo};
use super::llm::provider::ChatProvider;
use super::message::Message;
use super::tool::registry::ToolRegistry;
use super::tool::{Tool, ToolResult};
use super::wire::{EventType, Wire};

/// Stores caller-supplied static binary metadata on the shared knowledge
/// model and forwards it as a TARGET_INFO event. The core never computes
/// these fields itself (SPEC_FULL §3); this is the one place it accepts them.
pub fn set_target_info(knowledge: &Arc<Mutex<KnowledgeModel>>, wire: Option<&Arc<Wire>>, target: TargetInfo) {
    let payload = json!({
        "format": target.format,
        "arch": target.arch,
        "bits": target.bits,
        "endian": target.endian,
        "stripped": target.stripped,
        "pie": target.pie,
        "nx": target.nx,
        "canary": target.canary,
        "relro": target.relro,
    });
    knowledge.lock().unwrap().target = target;
    if let Some(wire) = wire {
        wire.send(EventType::TargetInfo, payload);
    }
}

/// Everything `dispatch_subagent` needs to spawn a nested, isolated agent
/// loop for a named sub-agent: where to find its definition, what it talks
/// to, which ordinary tools it may use, and where its ephemeral context log
/// lives.
pub struct DispatchSubagentTool {
    agent_registry: Arc<AgentRegistry>,
    provider: Arc<dyn ChatProvider>,
    /// The tool subset available to dispatched sub-agents. Deliberately does
    /// not include `dispatch_subagent`/`update_model` themselves — nested
    /// sub-agents report findings back through their own tool result rather
    /// than dispatching further sub-agents (SPEC_FULL §4.10 describes one
    /// level of delegation from the orchestrator).
    base_tools: ToolRegistry,
    wire: Option<Arc<Wire>>,
    context_manager: Option<Arc<dyn ContextManager>>,
    loop_config: AgentLoopConfig,
    knowledge: Arc<Mutex<KnowledgeModel>>,
    ephemeral_dir: PathBuf,
}

impl DispatchSubagentTool {
    pub fn new(
        agent_registry: Arc<AgentRegistry>,
        provider: Arc<dyn ChatProvider>,
        base_tools: ToolRegistry,
        wire: Option<Arc<Wire>>,
        context_manager: Option<Arc<dyn ContextManager>>,
        loop_config: AgentLoopConfig,
        knowledge: Arc<Mutex<KnowledgeModel>>,
        ephemeral_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent_registry,
            provider,
            base_tools,
            wire,
            context_manager,
            loop_config,
            knowledge,
            ephemeral_dir: ephemeral_dir.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DispatchParams {
    agent_name: String,
    task: String,
    #[serde(default)]
    context: Option<String>,
}

#[async_trait]
impl Tool for DispatchSubagentTool {
    fn name(&self) -> &str {
        "dispatch_subagent"
    }

    fn description(&self) -> &str {
        "Dispatch a named specialist sub-agent (e.g. 'triage', 'static', 'dynamic', 'coding') \
         to work on a focused task. The sub-agent runs its own agent loop with an isolated, \
         ephemeral context and a restricted tool set, and sees a snapshot of the shared \
         knowledge model. Returns its final answer."
    }

    fn parameters_schema(&self) -> Json {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the registered sub-agent to dispatch."
                },
                "task": {
                    "type": "string",
                    "description": "The task description for the sub-agent."
                },
                "context": {
                    "type": "string",
                    "description": "Optional extra context to seed the sub-agent's conversation with."
                }
            },
            "required": ["agent_name", "task"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: DispatchParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };

        let config = match self.agent_registry.get(&params.agent_name) {
            Some(c) => c.clone(),
            None => {
                return ToolResult::err(format!(
                    "Unknown subagent '{}'. Available: {}",
                    params.agent_name,
                    self.agent_registry.names().join(", ")
                ))
            }
        };

        log::info!("dispatching subagent '{}'", config.name);
        if let Some(wire) = &self.wire {
            wire.send(EventType::SubagentBegin, json!({"agent": config.name}));
        }

        let task_text = match &params.context {
            Some(extra) if !extra.is_empty() => format!("{}\n\nAdditional context:\n{}", params.task, extra),
            _ => params.task.clone(),
        };

        let ephemeral_path = self.ephemeral_dir.join(format!("subagent-{}.jsonl", Uuid::new_v4()));
        let mut ctx = match Context::create(&ephemeral_path).await {
            Ok(c) => c,
            Err(e) => {
                if let Some(wire) = &self.wire {
                    wire.send(EventType::SubagentEnd, json!({"agent": config.name}));
                }
                return ToolResult::err(format!("failed to create subagent context: {e}"));
            }
        };
        if let Err(e) = ctx.append(Message::user(task_text)).await {
            let _ = tokio::fs::remove_file(&ephemeral_path).await;
            if let Some(wire) = &self.wire {
                wire.send(EventType::SubagentEnd, json!({"agent": config.name}));
            }
            return ToolResult::err(format!("failed to seed subagent context: {e}"));
        }

        let knowledge_summary = self.knowledge.lock().unwrap().summary(Some(&config.name), 8_000);
        let mut subagent_config = config.clone();
        if !knowledge_summary.is_empty() {
            subagent_config.system_prompt =
                format!("{}\n\n# Shared Knowledge\n{}", config.system_prompt, knowledge_summary);
        }

        let agent_loop = AgentLoop::with_loop_config(
            subagent_config,
            self.provider.clone(),
            &self.base_tools,
            self.wire.clone(),
            self.context_manager.clone(),
            self.loop_config,
        );

        let outcome = agent_loop.run(&mut ctx, &NoopAgentLoopObserver).await;

        // Best-effort: the ephemeral context file has already served its
        // purpose (the in-memory conversation is what mattered to this run).
        let _ = tokio::fs::remove_file(&ephemeral_path).await;

        log::info!("subagent '{}' finished", config.name);
        if let Some(wire) = &self.wire {
            wire.send(EventType::SubagentEnd, json!({"agent": config.name}));
        }

        match outcome {
            AgentOutcome::Complete { final_text } => ToolResult::ok_with_brief(
                format!("[{}] completed:\n{}", config.name, final_text),
                format!("{} finished", config.name),
            ),
            AgentOutcome::MaxSteps => ToolResult::ok_with_brief(
                format!("[{}] reached its step budget without finishing.", config.name),
                format!("{} hit max steps", config.name),
            ),
            AgentOutcome::Error(e) => ToolResult::err(format!("[{}] failed: {e}", config.name)),
        }
    }
}

/// Records observations, hypotheses, and findings into the shared
/// [`KnowledgeModel`] and emits the matching wire event.
pub struct UpdateModelTool {
    knowledge: Arc<Mutex<KnowledgeModel>>,
    wire: Option<Arc<Wire>>,
}

impl UpdateModelTool {
    pub fn new(knowledge: Arc<Mutex<KnowledgeModel>>, wire: Option<Arc<Wire>>) -> Self {
        Self { knowledge, wire }
    }
}

fn default_agent() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct UpdateModelParams {
    action: String,
    #[serde(default = "default_agent")]
    agent: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    address: Option<u64>,
    #[serde(default)]
    addresses: Vec<u64>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    hypothesis_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Normalizes common synonyms down to one of `"observation"`, `"hypothesis"`,
/// `"finding"` (SPEC_FULL §4.10: "action is normalized from common synonyms").
fn normalize_action(raw: &str) -> &'static str {
    match raw.to_ascii_lowercase().as_str() {
        "hypothesis" | "hypothesize" | "propose" | "suggest" | "update_hypothesis" => "hypothesis",
        "finding" | "confirm" | "verify" | "finalize" | "promote" => "finding",
        _ => "observation",
    }
}

fn hypothesis_status_label(status: HypothesisStatus) -> &'static str {
    match status {
        HypothesisStatus::Proposed => "proposed",
        HypothesisStatus::Testing => "testing",
        HypothesisStatus::Confirmed => "confirmed",
        HypothesisStatus::Rejected => "rejected",
    }
}

#[async_trait]
impl Tool for UpdateModelTool {
    fn name(&self) -> &str {
        "update_model"
    }

    fn description(&self) -> &str {
        "Record an observation, propose or update a hypothesis, or establish a finding in the \
         shared knowledge model. action: 'observation' | 'hypothesis' | 'finding' (synonyms like \
         'confirm'/'propose'/'note' are accepted). Supplying hypothesis_id with action='finding' \
         promotes that hypothesis into a confirmed finding."
    }

    fn parameters_schema(&self) -> Json {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "description": "observation | hypothesis | finding (synonyms accepted)"},
                "agent": {"type": "string", "description": "Name of the agent making this update."},
                "description": {"type": "string", "description": "The observation data, hypothesis claim, or finding description."},
                "category": {"type": "string", "description": "Free-form category, e.g. 'crypto', 'auth', 'strings'."},
                "confidence": {"type": "number", "description": "0.0-1.0 confidence for a new hypothesis."},
                "address": {"type": "integer", "description": "A single associated address, if any."},
                "addresses": {"type": "array", "items": {"type": "integer"}, "description": "Associated addresses for a finding."},
                "evidence": {"type": "array", "items": {"type": "string"}, "description": "Observation ids supporting this hypothesis/finding."},
                "hypothesis_id": {"type": "string", "description": "Existing hypothesis id, to update its status or promote it to a finding."},
                "status": {"type": "string", "description": "proposed | testing | confirmed | rejected, used with hypothesis_id to update an existing hypothesis."},
                "source": {"type": "string", "description": "Observation source, e.g. tool name. Defaults to 'agent'."},
                "type": {"type": "string", "description": "Observation kind, e.g. 'strings', 'disassembly'. Defaults to 'note'."},
                "details": {"type": "object", "description": "Extra structured data carried on a promoted finding."}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: UpdateModelParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };

        match normalize_action(&params.action) {
            "observation" => self.record_observation(params),
            "hypothesis" => self.record_hypothesis(params),
            "finding" => self.record_finding(params),
            _ => unreachable!(),
        }
    }
}

impl UpdateModelTool {
    fn record_observation(&self, params: UpdateModelParams) -> ToolResult {
        let mut obs = Observation::new(
            params.kind.unwrap_or_else(|| "note".to_string()),
            params.source.unwrap_or(params.agent),
            params.description.clone(),
        );
        if let Some(addr) = params.address {
            obs = obs.with_address(addr);
        }

        let id = {
            let mut model = self.knowledge.lock().unwrap();
            model.add_observation(obs)
        };

        if let Some(wire) = &self.wire {
            wire.send(
                EventType::Observation,
                json!({"description": params.description, "category": params.category}),
            );
        }
        ToolResult::ok_with_brief(format!("Observation {id} recorded."), "Recording observation...")
    }

    fn record_hypothesis(&self, params: UpdateModelParams) -> ToolResult {
        if let (Some(hyp_id), Some(status)) = (&params.hypothesis_id, &params.status) {
            let updated = {
                let mut model = self.knowledge.lock().unwrap();
                let hyp = match model.get_hypothesis_mut(hyp_id) {
                    Some(h) => h,
                    None => return ToolResult::err(format!("unknown hypothesis id '{hyp_id}'")),
                };
                match status.to_ascii_lowercase().as_str() {
                    "confirmed" => hyp.confirm(params.agent.clone(), params.evidence.clone()),
                    "rejected" => hyp.reject(params.agent.clone()),
                    "testing" => hyp.status = HypothesisStatus::Testing,
                    "proposed" => hyp.status = HypothesisStatus::Proposed,
                    other => return ToolResult::err(format!("unknown hypothesis status '{other}'")),
                }
                (hyp.id.clone(), hyp.description.clone(), hyp.status, hyp.confidence)
            };
            let (id, description, status, confidence) = updated;
            if let Some(wire) = &self.wire {
                wire.send(
                    EventType::Hypothesis,
                    json!({"id": id, "description": description, "status": hypothesis_status_label(status), "confidence": confidence}),
                );
            }
            return ToolResult::ok_with_brief(format!("Hypothesis {id} updated."), "Updating hypothesis...");
        }

        let mut hyp = Hypothesis::new(params.description.clone(), params.category.clone(), params.agent.clone());
        if let Some(conf) = params.confidence {
            hyp.confidence = conf;
        }
        hyp.address = params.address;
        hyp.evidence = params.evidence.clone();

        let (id, status, confidence) = {
            let mut model = self.knowledge.lock().unwrap();
            let id = model.add_hypothesis(hyp);
            let h = model.get_hypothesis(&id).expect("just inserted");
            (id, h.status, h.confidence)
        };

        if let Some(wire) = &self.wire {
            wire.send(
                EventType::Hypothesis,
                json!({"id": id, "description": params.description, "status": hypothesis_status_label(status), "confidence": confidence}),
            );
        }
        ToolResult::ok_with_brief(format!("Hypothesis {id} proposed."), "Proposing hypothesis...")
    }

    fn record_finding(&self, params: UpdateModelParams) -> ToolResult {
        if let Some(hyp_id) = &params.hypothesis_id {
            let finding = {
                let mut model = self.knowledge.lock().unwrap();
                match model.promote_hypothesis(hyp_id, params.agent.clone(), params.details.clone()) {
                    Some(f) => f,
                    None => return ToolResult::err(format!("unknown hypothesis id '{hyp_id}'")),
                }
            };
            if let Some(wire) = &self.wire {
                wire.send(
                    EventType::Finding,
                    json!({"description": finding.description, "category": finding.category, "verified": finding.verified}),
                );
            }
            return ToolResult::ok_with_brief(
                format!("Hypothesis {hyp_id} promoted to finding {}.", finding.id),
                "Promoting finding...",
            );
        }

        let finding: Finding = Finding::new(
            params.description.clone(),
            params.category.clone(),
            params.addresses.clone(),
            params.evidence.clone(),
            params.agent,
        );
        let id = {
            let mut model = self.knowledge.lock().unwrap();
            model.add_finding(finding.clone())
        };
        if let Some(wire) = &self.wire {
            wire.send(
                EventType::Finding,
                json!({"description": finding.description, "category": finding.category, "verified": finding.verified}),
            );
        }
        ToolResult::ok_with_brief(format!("Finding {id} recorded."), "Recording finding...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::agent::config::AgentConfig;
    use crate::cloudllm::knowledge::HypothesisStatus;
    use crate::cloudllm::llm::provider::{ProviderConfig, ScriptedProvider};

    fn knowledge() -> Arc<Mutex<KnowledgeModel>> {
        Arc::new(Mutex::new(KnowledgeModel::new()))
    }

    #[tokio::test]
    async fn update_model_records_observation() {
        let tool = UpdateModelTool::new(knowledge(), None);
        let result = tool
            .execute(json!({"action": "note", "agent": "static-1", "description": "found flag{...}", "category": "strings"}))
            .await;
        assert!(matches!(result, ToolResult::Ok { .. }));
    }

    #[tokio::test]
    async fn update_model_proposes_then_promotes_hypothesis() {
        let model = knowledge();
        let tool = UpdateModelTool::new(model.clone(), None);

        let propose = tool
            .execute(json!({"action": "propose", "agent": "static-1", "description": "uses AES-ECB", "category": "crypto", "confidence": 0.6}))
            .await;
        let (output, _) = match propose {
            ToolResult::Ok { output, brief } => (output, brief),
            other => panic!("expected Ok, got {other:?}"),
        };
        assert!(output.contains("proposed"));

        let hyp_id = model.lock().unwrap().hypotheses[0].id.clone();
        let promote = tool
            .execute(json!({"action": "confirm", "agent": "dynamic-1", "hypothesis_id": hyp_id}))
            .await;
        assert!(matches!(promote, ToolResult::Ok { .. }));

        let locked = model.lock().unwrap();
        assert_eq!(locked.findings.len(), 1);
        assert_eq!(locked.hypotheses[0].status, HypothesisStatus::Confirmed);
    }

    #[tokio::test]
    async fn update_model_rejects_unknown_hypothesis_id() {
        let tool = UpdateModelTool::new(knowledge(), None);
        let result = tool
            .execute(json!({"action": "finding", "agent": "dynamic-1", "hypothesis_id": "missing"}))
            .await;
        assert!(matches!(result, ToolResult::Err { .. }));
    }

    #[tokio::test]
    async fn dispatch_subagent_runs_nested_loop_and_cleans_up_ephemeral_file() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentConfig::new("triage", "Plan the analysis.").with_max_steps(3));
        let registry = Arc::new(registry);

        let provider = Arc::new(ScriptedProvider::single_text_reply(ProviderConfig::default(), "triage done"));
        let dir = tempfile::tempdir().unwrap();
        let tool = DispatchSubagentTool::new(
            registry,
            provider,
            ToolRegistry::new(),
            None,
            None,
            AgentLoopConfig::default(),
            knowledge(),
            dir.path(),
        );

        let result = tool
            .execute(json!({"agent_name": "triage", "task": "map the binary"}))
            .await;
        match result {
            ToolResult::Ok { output, .. } => assert!(output.contains("triage done")),
            other => panic!("expected Ok, got {other:?}"),
        }

        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.next().is_none(), "ephemeral context file should have been removed");
    }

    #[test]
    fn set_target_info_updates_model_and_emits_event() {
        let model = knowledge();
        let wire = Arc::new(Wire::new());
        let mut sub = wire.subscribe();

        let target = TargetInfo {
            path: "/bin/target".to_string(),
            format: "ELF".to_string(),
            arch: "x86_64".to_string(),
            endian: "little".to_string(),
            bits: 64,
            stripped: true,
            pie: true,
            nx: true,
            canary: false,
            relro: "partial".to_string(),
            entry_point: Some(0x1000),
            sections: Vec::new(),
        };
        set_target_info(&model, Some(&wire), target);

        assert_eq!(model.lock().unwrap().target.arch, "x86_64");
        match sub.receiver.try_recv() {
            Ok(crate::cloudllm::wire::WireEvent::Event { event_type, .. }) => {
                assert!(matches!(event_type, EventType::TargetInfo))
            }
            other => panic!("expected TargetInfo event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_subagent_rejects_unknown_agent_name() {
        let tool = DispatchSubagentTool::new(
            Arc::new(AgentRegistry::new()),
            Arc::new(ScriptedProvider::single_text_reply(ProviderConfig::default(), "x")),
            ToolRegistry::new(),
            None,
            None,
            AgentLoopConfig::default(),
            knowledge(),
            std::env::temp_dir(),
        );
        let result = tool.execute(json!({"agent_name": "missing", "task": "x"})).await;
        assert!(matches!(result, ToolResult::Err { .. }));
    }
}
