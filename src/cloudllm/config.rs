//! Plain, manually-constructed configuration structs.
//!
//! Following the teacher's `config.rs` (`CloudLLMConfig`): no file-format
//! parser lives in the core (SPEC_FULL §1/§10.3). Callers build these with
//! plain field construction, `Default`, or the builder methods below.

use std::time::Duration;

/// Tunables for [`crate::cloudllm::agent::AgentLoop`].
#[derive(Debug, Clone, Copy)]
pub struct AgentLoopConfig {
    /// Reserved token headroom checked against `provider.context_window`
    /// before each step (SPEC_FULL §4.7 step 1).
    pub reserve_tokens: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self { reserve_tokens: 20_000 }
    }
}

impl AgentLoopConfig {
    pub fn with_reserve_tokens(mut self, reserve_tokens: usize) -> Self {
        self.reserve_tokens = reserve_tokens;
        self
    }
}

/// Tunables for [`crate::cloudllm::pty::PtyManager`] and
/// [`crate::cloudllm::pty::PtySession`].
#[derive(Debug, Clone, Copy)]
pub struct PtyManagerConfig {
    pub max_sessions: usize,
    pub rolling_buffer_lines: usize,
    pub settle: Duration,
}

impl Default for PtyManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            rolling_buffer_lines: 50_000,
            settle: Duration::from_millis(300),
        }
    }
}

impl PtyManagerConfig {
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_rolling_buffer_lines(mut self, lines: usize) -> Self {
        self.rolling_buffer_lines = lines;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_loop_config_defaults_match_spec() {
        let config = AgentLoopConfig::default();
        assert_eq!(config.reserve_tokens, 20_000);
    }

    #[test]
    fn pty_manager_config_builder_overrides_defaults() {
        let config = PtyManagerConfig::default().with_max_sessions(3);
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.rolling_buffer_lines, 50_000);
    }
}
