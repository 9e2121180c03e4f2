//! Crate-wide error type.
//!
//! Mirrors the teacher's per-module error style (`BashError`, `FileSystemError`):
//! a plain enum with a hand-rolled `Display` and `std::error::Error` impl, no
//! `thiserror`/`anyhow`. `CoreError` is the error half of fallible core APIs;
//! it is deliberately *not* used to represent the D-Mail revert signal or the
//! step-budget outcome — see [`crate::agent::StepOutcome`] and
//! [`crate::agent::AgentOutcome`].

use std::fmt;
use std::io;

/// Errors surfaced by the context store, tool registry, PTY layer, and wire.
#[derive(Debug)]
pub enum CoreError {
    /// I/O failure while appending to, rewriting, or restoring the context log.
    Persistence(String),
    /// A log line could not be parsed during `restore`; carried for logging,
    /// never propagated (malformed lines are skipped, not fatal).
    MalformedLogLine(String),
    /// A tool argument blob failed JSON-schema validation.
    ToolValidation { tool: String, message: String },
    /// A tool's `execute` raised/returned an error.
    ToolExecution { tool: String, message: String },
    /// No tool registered under this name.
    UnknownTool(String),
    /// Any uncaught error from `step()` other than the revert signal.
    FatalLoop(String),
    /// PTY process failed to spawn.
    PtySpawn(String),
    /// Write attempted against a session that is not `running`.
    PtyNotRunning(String),
    /// Operation attempted on an unknown session id.
    PtyUnknownSession(String),
    /// Subagent name not found in the registry.
    UnknownAgent(String),
    /// Generic I/O error, wrapped for `From<io::Error>`.
    Io(io::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Persistence(msg) => write!(f, "persistence failure: {msg}"),
            CoreError::MalformedLogLine(msg) => write!(f, "malformed log line: {msg}"),
            CoreError::ToolValidation { tool, message } => {
                write!(f, "tool '{tool}' validation failed: {message}")
            }
            CoreError::ToolExecution { tool, message } => {
                write!(f, "tool '{tool}' execution failed: {message}")
            }
            CoreError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
            CoreError::FatalLoop(msg) => write!(f, "agent loop failed: {msg}"),
            CoreError::PtySpawn(msg) => write!(f, "failed to spawn PTY session: {msg}"),
            CoreError::PtyNotRunning(id) => write!(f, "PTY session '{id}' is not running"),
            CoreError::PtyUnknownSession(id) => write!(f, "unknown PTY session: {id}"),
            CoreError::UnknownAgent(name) => write!(f, "unknown subagent: {name}"),
            CoreError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        CoreError::Io(e)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
