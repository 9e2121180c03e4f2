//! The `read_file` tool: reads UTF-8 text files (or lists directories).
//!
//! Grounded on `original_source/reagent/tool/builtin/read_file.py`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::cloudllm::tool::{Tool, ToolResult};

const DEFAULT_LIMIT: usize = 2000;

#[derive(Debug, Deserialize)]
struct ReadFileParams {
    path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Reads a UTF-8 text file, optionally starting at `offset` and capped at
/// `limit` lines, restricted to a configured root directory. Pointing it at
/// a directory lists its entries instead of erroring.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, requested: &str) -> Result<PathBuf, String> {
        let candidate = self.root.join(requested);
        let canonical_root = self.root.canonicalize().map_err(|e| e.to_string())?;
        let canonical = canonicalize_best_effort(&candidate);
        if !canonical.starts_with(&canonical_root) {
            return Err(format!("path '{requested}' escapes the allowed root"));
        }
        Ok(candidate)
    }
}

fn canonicalize_best_effort(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn list_directory(path: &Path) -> ToolResult {
    let entries = match std::fs::read_dir(path) {
        Ok(e) => e,
        Err(e) => return ToolResult::err(format!("Error listing directory: {e}")),
    };
    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        names.push(if is_dir { format!("{name}/") } else { name });
    }
    names.sort();
    ToolResult::ok(format!("Directory listing for {}:\n{}", path.display(), names.join("\n")))
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a UTF-8 text file, or list a directory's \
         entries. Supports pagination via offset/limit for large files."
    }

    fn parameters_schema(&self) -> Json {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the working root."},
                "offset": {"type": "integer", "description": "0-indexed line to start reading from."},
                "limit": {"type": "integer", "description": "Maximum number of lines to return."}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: Json) -> ToolResult {
        let params: ReadFileParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid parameters: {e}")),
        };

        let path = match self.resolve(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        if path.is_dir() {
            return list_directory(&path);
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(format!("Error reading {}: {e}", params.path)),
        };

        let lines: Vec<&str> = contents.split('\n').collect();
        let total = lines.len();
        let start = params.offset.min(total);
        let end = (start + params.limit).min(total);

        let mut out = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            out.push_str(&format!("{:6}\t{}\n", start + i + 1, line));
        }

        if end < total {
            out.push_str(&format!("\n[{} more lines. Use offset={} to continue.]", total - end, end));
        }

        ToolResult::ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_file_with_line_numbers() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("hello.txt");
        std::fs::File::create(&file_path).unwrap().write_all(b"one\ntwo\nthree").unwrap();

        let tool = ReadFileTool::new(dir.path());
        let result = tool.execute(serde_json::json!({"path": "hello.txt"})).await;
        match result {
            ToolResult::Ok { output, .. } => {
                assert!(output.contains("1\tone"));
                assert!(output.contains("3\tthree"));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn paginates_with_offset_and_limit() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("big.txt");
        let body: String = (0..10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(&file_path, body).unwrap();

        let tool = ReadFileTool::new(dir.path());
        let result = tool.execute(serde_json::json!({"path": "big.txt", "offset": 0, "limit": 3})).await;
        match result {
            ToolResult::Ok { output, .. } => {
                assert!(output.contains("more lines"));
                assert!(output.contains("offset=3"));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_path_escaping_root() {
        let dir = tempdir().unwrap();
        let tool = ReadFileTool::new(dir.path());
        let result = tool.execute(serde_json::json!({"path": "../../etc/passwd"})).await;
        assert!(matches!(result, ToolResult::Err { .. }));
    }

    #[tokio::test]
    async fn lists_directory_contents() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("file.txt"), "hi").unwrap();

        let tool = ReadFileTool::new(dir.path());
        let result = tool.execute(serde_json::json!({"path": "."})).await;
        match result {
            ToolResult::Ok { output, .. } => {
                assert!(output.contains("sub/"));
                assert!(output.contains("file.txt"));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }
}
