//! Agent definitions and the registry the orchestrator resolves them from.
//!
//! Grounded on `original_source/reagent/agent/agent.py`'s `AgentConfig`, with
//! the markdown/YAML frontmatter loader dropped per SPEC_FULL §1/§4.7.1 — a
//! plain struct, built programmatically, matching the teacher's
//! `CloudLLMConfig` construction style.

use std::collections::BTreeMap;

pub const DEFAULT_MAX_STEPS: usize = 50;

/// Whether an agent is the top-level orchestrator (and so gets
/// `dispatch_subagent`/`update_model` registered) or a leaf specialist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Primary,
    Subagent,
}

/// A named agent definition: system prompt, allowed tool names, step budget.
/// Constructed with a builder, matching the teacher's `ClientWrapper`/
/// `Agent` builder-method convention rather than a config-file loader.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub mode: AgentMode,
    pub allowed_tools: Vec<String>,
    pub max_steps: usize,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            mode: AgentMode::Subagent,
            allowed_tools: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            model: None,
            temperature: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// `name -> AgentConfig` map used by the orchestrator's `dispatch_subagent`
/// tool. No discovery/loading behavior beyond register/get/names (SPEC_FULL
/// §4.7.1).
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    configs: BTreeMap<String, AgentConfig>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: AgentConfig) {
        self.configs.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Option<&AgentConfig> {
        self.configs.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = AgentConfig::new("static", "You analyze statically.")
            .with_mode(AgentMode::Subagent)
            .with_allowed_tools(vec!["read_file".to_string(), "shell".to_string()])
            .with_max_steps(30);
        assert_eq!(config.name, "static");
        assert_eq!(config.max_steps, 30);
        assert_eq!(config.allowed_tools.len(), 2);
    }

    #[test]
    fn registry_roundtrips_by_name() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentConfig::new("triage", "Plan the analysis."));
        assert!(registry.get("triage").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["triage".to_string()]);
    }
}
