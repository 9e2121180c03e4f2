//! Module tree for the concurrent control plane: agent loop, context store,
//! tool registry, PTY layer, event wire, knowledge model, and the
//! orchestrator's `dispatch_subagent`/`update_model` tools (SPEC_FULL §2).

pub mod agent;
pub mod config;
pub mod context;
pub mod context_management;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod pty;
pub mod tool;
pub mod wire;
