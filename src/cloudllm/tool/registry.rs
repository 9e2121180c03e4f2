//! Tool registry: discover, register, and dispatch tools.
//!
//! Grounded on `original_source/reagent/tool/registry.py`'s `ToolRegistry`.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value as Json;

use super::truncation::{truncate_output, MAX_BYTES, MAX_LINES};
use super::{Tool, ToolSpec};

/// Registry of available tools, filterable per-agent via [`ToolRegistry::subset`].
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if self.tools.contains_key(tool.name()) {
            log::warn!("tool '{}' already registered, overwriting", tool.name());
        }
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas suitable for sending to the LLM, optionally filtered by name.
    pub fn specs(&self, names: Option<&[String]>) -> Vec<ToolSpec> {
        self.tools
            .values()
            .filter(|t| names.map_or(true, |ns| ns.iter().any(|n| n == t.name())))
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect()
    }

    /// A filtered view containing only the named tools; unknown names are
    /// logged and skipped.
    pub fn subset(&self, names: &[String]) -> ToolRegistry {
        let mut subset = ToolRegistry::new();
        for name in names {
            match self.tools.get(name) {
                Some(tool) => subset.register(tool.clone()),
                None => log::warn!("tool '{name}' not found in registry"),
            }
        }
        subset
    }

    /// Validates `arguments` against the tool's own parameter schema.
    /// A schema that fails to compile is skipped rather than blocking
    /// execution (the tool's own `execute`-time deserialization remains the
    /// backstop); an arguments blob that fails a schema that *does* compile
    /// is rejected without ever calling `execute` (SPEC_FULL §4.5).
    fn validate_arguments(tool: &dyn Tool, arguments: &Json) -> Result<(), String> {
        let schema = tool.parameters_schema();
        let Ok(validator) = jsonschema::validator_for(&schema) else {
            return Ok(());
        };
        let errors: Vec<String> = validator.iter_errors(arguments).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Looks up `name`, validates+executes it, and truncates the result.
    /// Never propagates a panic from `execute` — it is caught and surfaced
    /// as an error result (SPEC_FULL §4.5).
    pub async fn dispatch(&self, name: &str, arguments: Json) -> (String, bool) {
        let tool = match self.tools.get(name) {
            Some(t) => t.clone(),
            None => {
                return (
                    format!("Unknown tool: {name}. Available tools: {}", self.names().join(", ")),
                    true,
                )
            }
        };

        if let Err(reason) = Self::validate_arguments(tool.as_ref(), &arguments) {
            return (truncate_output(&format!("Invalid arguments for {name}: {reason}"), MAX_LINES, MAX_BYTES), true);
        }

        let result = AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await;
        let (output, is_error) = match result {
            Ok(tool_result) => tool_result.into_content(),
            Err(_) => {
                log::error!("tool '{name}' panicked during execution");
                (format!("Error executing {name}: tool panicked"), true)
            }
        };

        (truncate_output(&output, MAX_LINES, MAX_BYTES), is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tool::ToolResult;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Json {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, arguments: Json) -> ToolResult {
            ToolResult::ok(arguments.to_string())
        }
    }

    struct StrictEcho;

    #[async_trait]
    impl Tool for StrictEcho {
        fn name(&self) -> &str {
            "strict_echo"
        }
        fn description(&self) -> &str {
            "echoes, but requires a string 'text' field"
        }
        fn parameters_schema(&self) -> Json {
            serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: Json) -> ToolResult {
            ToolResult::ok(arguments["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct Panicker;

    #[async_trait]
    impl Tool for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> Json {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Json) -> ToolResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let (content, is_error) = registry.dispatch("missing", serde_json::json!({})).await;
        assert!(is_error);
        assert!(content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let (content, is_error) = registry.dispatch("echo", serde_json::json!({"a": 1})).await;
        assert!(!is_error);
        assert!(content.contains("\"a\":1"));
    }

    #[tokio::test]
    async fn dispatch_catches_panics_as_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Panicker));
        let (_, is_error) = registry.dispatch("panicker", serde_json::json!({})).await;
        assert!(is_error);
    }

    #[tokio::test]
    async fn dispatch_rejects_arguments_failing_schema_without_invoking_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StrictEcho));
        let (content, is_error) = registry.dispatch("strict_echo", serde_json::json!({"wrong_field": 1})).await;
        assert!(is_error);
        assert!(content.contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn dispatch_accepts_arguments_satisfying_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StrictEcho));
        let (content, is_error) = registry.dispatch("strict_echo", serde_json::json!({"text": "hi"})).await;
        assert!(!is_error);
        assert_eq!(content, "hi");
    }

    #[test]
    fn subset_filters_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let sub = registry.subset(&["echo".to_string(), "missing".to_string()]);
        assert_eq!(sub.len(), 1);
        assert!(sub.get("echo").is_some());
    }
}
