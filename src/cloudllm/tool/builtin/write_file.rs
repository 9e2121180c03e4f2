//! The `write_file` tool: writes or overwrites UTF-8 text files.
//!
//! Grounded on `original_source/reagent/tool/builtin/write_file.py`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::cloudllm::tool::{Tool, ToolResult};

#[derive(Debug, Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

/// Writes (or appends to) a UTF-8 text file under a configured root
/// directory, creating parent directories as needed.
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, requested: &str) -> Result<PathBuf, String> {
        let candidate = self.root.join(requested);
        let canonical_root = self.root.canonicalize().map_err(|e| e.to_string())?;
        let check_against = candidate.parent().unwrap_or(&candidate);
        let canonical_parent = canonicalize_best_effort(check_against);
        if !canonical_parent.starts_with(&canonical_root) {
            return Err(format!("path '{requested}' escapes the allowed root"));
        }
        Ok(candidate)
    }
}

fn canonicalize_best_effort(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write UTF-8 text content to a file, creating parent directories as \
         needed. Overwrites by default; set append=true to append instead."
    }

    fn parameters_schema(&self) -> Json {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the working root."},
                "content": {"type": "string", "description": "Text content to write."},
                "append": {"type": "boolean", "description": "Append instead of overwrite."}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: WriteFileParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };

        let path = match self.resolve(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::err(format!("Error creating directories for {}: {e}", params.path));
            }
        }

        let write_result = if params.append {
            use std::io::Write as _;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| f.write_all(params.content.as_bytes()))
        } else {
            std::fs::write(&path, params.content.as_bytes())
        };

        if let Err(e) = write_result {
            return ToolResult::err(format!("Error writing {}: {e}", params.path));
        }

        let line_count = params.content.split('\n').count();
        let verb = if params.append { "Appended to" } else { "Wrote" };
        ToolResult::ok(format!("{verb} {} ({} lines).", params.path, line_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_new_file() {
        let dir = tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path());
        let result = tool
            .execute(serde_json::json!({"path": "out.txt", "content": "hello\nworld"}))
            .await;
        assert!(matches!(result, ToolResult::Ok { .. }));
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello\nworld");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path());
        let result = tool
            .execute(serde_json::json!({"path": "nested/dir/out.txt", "content": "hi"}))
            .await;
        assert!(matches!(result, ToolResult::Ok { .. }));
        assert!(dir.path().join("nested/dir/out.txt").exists());
    }

    #[tokio::test]
    async fn appends_when_requested() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("log.txt"), "first\n").unwrap();
        let tool = WriteFileTool::new(dir.path());
        let result = tool
            .execute(serde_json::json!({"path": "log.txt", "content": "second\n", "append": true}))
            .await;
        assert!(matches!(result, ToolResult::Ok { .. }));
        assert_eq!(std::fs::read_to_string(dir.path().join("log.txt")).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn rejects_path_escaping_root() {
        let dir = tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path());
        let result = tool
            .execute(serde_json::json!({"path": "../escape.txt", "content": "x"}))
            .await;
        assert!(matches!(result, ToolResult::Err { .. }));
    }
}
