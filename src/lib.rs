// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// Re-exports for the most commonly used types, so callers don't have to
// spell out the full module path for everyday use.
pub use cloudllm::agent::{AgentConfig, AgentLoop, AgentOutcome};
pub use cloudllm::context::Context;
pub use cloudllm::message::{ContentPart, Message, Role};
pub use cloudllm::wire::{EventType, Wire};
