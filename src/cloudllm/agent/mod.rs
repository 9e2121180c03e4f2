//! Agent definitions and the step-scheduler loop (SPEC_FULL §4.7).

pub mod config;
pub mod run;

pub use config::{AgentConfig, AgentMode, AgentRegistry, DEFAULT_MAX_STEPS};
pub use run::{
    AgentLoop, AgentLoopObserver, AgentOutcome, ContextManager, DefaultContextManager,
    NoopAgentLoopObserver,
};
