//! The `shell` tool: runs commands, interactively via the PTY layer or as a
//! one-shot subprocess.
//!
//! Grounded on `original_source/reagent/tool/builtin/shell.py`'s `ShellTool`:
//! this crate uses a one-shot subprocess for non-interactive commands and
//! the PTY layer for anything requiring an interactive session (a
//! `session_id` is supplied, reused across calls).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::cloudllm::pty::PtyManager;
use crate::cloudllm::tool::truncation::{sanitize_binary_output, strip_ansi};
use crate::cloudllm::tool::{Tool, ToolResult};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Runs shell commands. One-shot invocations spawn and reap a fresh process
/// group per call; `session_id` invocations reuse a persistent interactive
/// PTY session across calls, letting the model `cd`, set env vars, or drive
/// a REPL over several turns.
pub struct ShellTool {
    pty_manager: Arc<PtyManager>,
    working_dir: PathBuf,
}

impl ShellTool {
    pub fn new(pty_manager: Arc<PtyManager>, working_dir: impl Into<PathBuf>) -> Self {
        Self { pty_manager, working_dir: working_dir.into() }
    }

    async fn run_one_shot(&self, params: &ShellParams) -> ToolResult {
        let cwd = params.cwd.as_ref().map(|c| self.working_dir.join(c)).unwrap_or_else(|| self.working_dir.clone());

        let mut command = tokio::process::Command::new("bash");
        command
            .arg("-c")
            .arg(&params.command)
            .current_dir(&cwd)
            .env("TERM", "dumb")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("Failed to start command: {e}")),
        };
        let pid = child.id().map(|p| p as i32);

        let timeout = Duration::from_millis(params.timeout_ms);
        let wait_result = tokio::time::timeout(timeout, child.wait_with_output()).await;

        match wait_result {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let cleaned = sanitize_binary_output(&strip_ansi(&combined));
                let exit_code = output.status.code().unwrap_or(-1);
                if output.status.success() {
                    ToolResult::ok(cleaned)
                } else {
                    ToolResult::err(format!("{cleaned}\n[exit code: {exit_code}]"))
                }
            }
            Ok(Err(e)) => ToolResult::err(format!("Error waiting for command: {e}")),
            Err(_) => {
                if let Some(pid) = pid {
                    unsafe {
                        libc::kill(-pid, libc::SIGKILL);
                    }
                }
                ToolResult::err(format!(
                    "Command timed out after {}ms and was killed.",
                    params.timeout_ms
                ))
            }
        }
    }

    async fn run_in_session(&self, session_id: &str, params: &ShellParams) -> ToolResult {
        let session = match self.pty_manager.get_or_spawn(session_id, "bash --norc --noprofile -i") {
            Ok(s) => s,
            Err(e) => return ToolResult::err(format!("Failed to start session: {e}")),
        };

        let timeout = Duration::from_millis(params.timeout_ms);
        match session.send(&params.command, None, Some(timeout)).await {
            Ok(output) => ToolResult::ok(output),
            Err(e) => ToolResult::err(format!("Session error: {e}")),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command. Omit session_id for a one-shot, non-interactive \
         invocation; pass session_id to reuse a persistent interactive shell \
         session across calls (state like cwd and env vars carries over)."
    }

    fn parameters_schema(&self) -> Json {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to run."},
                "session_id": {"type": "string", "description": "Reuse (or create) a named interactive session."},
                "cwd": {"type": "string", "description": "Working directory, relative to the tool's root (one-shot only)."},
                "timeout_ms": {"type": "integer", "description": "Timeout in milliseconds (one-shot only)."}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: ShellParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };

        match &params.session_id {
            Some(session_id) => self.run_in_session(session_id, &params).await,
            None => self.run_one_shot(&params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_returns_stdout() {
        let tool = ShellTool::new(Arc::new(PtyManager::new(None)), std::env::temp_dir());
        let result = tool.execute(serde_json::json!({"command": "echo hi"})).await;
        match result {
            ToolResult::Ok { output, .. } => assert!(output.contains("hi")),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_shot_reports_nonzero_exit() {
        let tool = ShellTool::new(Arc::new(PtyManager::new(None)), std::env::temp_dir());
        let result = tool.execute(serde_json::json!({"command": "exit 3"})).await;
        match result {
            ToolResult::Err { output, .. } => assert!(output.contains("exit code: 3")),
            other => panic!("expected Err, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_state_persists_across_calls_sharing_session_id() {
        let tool = ShellTool::new(Arc::new(PtyManager::new(None)), std::env::temp_dir());

        let export = tool
            .execute(serde_json::json!({"command": "export GREETING=hello", "session_id": "s1"}))
            .await;
        assert!(matches!(export, ToolResult::Ok { .. }));

        let echo = tool
            .execute(serde_json::json!({"command": "echo $GREETING", "session_id": "s1"}))
            .await;
        match echo {
            ToolResult::Ok { output, .. } => assert!(output.contains("hello"), "unexpected output: {output}"),
            other => panic!("expected Ok, got {other:?}"),
        }

        let cd = tool
            .execute(serde_json::json!({"command": "cd /tmp", "session_id": "s1"}))
            .await;
        assert!(matches!(cd, ToolResult::Ok { .. }));

        let pwd = tool.execute(serde_json::json!({"command": "pwd", "session_id": "s1"})).await;
        match pwd {
            ToolResult::Ok { output, .. } => assert!(output.contains("/tmp"), "unexpected output: {output}"),
            other => panic!("expected Ok, got {other:?}"),
        }

        assert_eq!(tool.pty_manager.len(), 1, "both calls should share one session");
    }

    #[tokio::test]
    async fn one_shot_kills_on_timeout() {
        let tool = ShellTool::new(Arc::new(PtyManager::new(None)), std::env::temp_dir());
        let result = tool
            .execute(serde_json::json!({"command": "sleep 5", "timeout_ms": 100}))
            .await;
        match result {
            ToolResult::Err { output, .. } => assert!(output.contains("timed out")),
            other => panic!("expected Err, got {other:?}"),
        }
    }
}
