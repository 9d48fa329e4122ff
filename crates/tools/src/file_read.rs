//! Read file tool: return a file's contents, optionally a line window.

use async_trait::async_trait;
use codeloop_core::tool::{PermissionLevel, Tool, ToolOutput};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ReadFileTool;

impl ReadFileTool {
    pub fn new() -> Self {
        Self
    }
}

/// Select `limit` lines starting at the 1-based line `offset`.
fn window(content: &str, offset: usize, limit: Option<usize>) -> String {
    let lines = content.lines().skip(offset.saturating_sub(1));
    match limit {
        Some(limit) => lines.take(limit).collect::<Vec<_>>().join("\n"),
        None => lines.collect::<Vec<_>>().join("\n"),
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use offset and limit to read a range of lines from a large file."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line to start reading from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Read
    }

    async fn execute(&self, _cancel: CancellationToken, input: serde_json::Value) -> ToolOutput {
        let Some(path) = input["path"].as_str() else {
            return ToolOutput::error("Missing 'path' argument");
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => return ToolOutput::error(format!("Failed to read file: {e}")),
        };

        let offset = input["offset"].as_u64().map(|n| n as usize);
        let limit = input["limit"].as_u64().map(|n| n as usize);
        if offset.is_none() && limit.is_none() {
            return ToolOutput::success(content);
        }

        ToolOutput::success(window(&content, offset.unwrap_or(1), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tool_definition() {
        let tool = ReadFileTool::new();
        assert_eq!(tool.name(), "read_file");
        assert!(tool.is_read_only());
        let schema = tool.parameters();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert!(schema["properties"]["path"].is_object());
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        writeln!(f, "Hello, world!").unwrap();

        let output = ReadFileTool::new()
            .execute(
                CancellationToken::new(),
                serde_json::json!({ "path": file_path.to_str().unwrap() }),
            )
            .await;

        assert!(!output.is_error);
        assert!(output.content.contains("Hello, world!"));
    }

    #[tokio::test]
    async fn read_line_window() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("lines.txt");
        std::fs::write(&file_path, "one\ntwo\nthree\nfour\n").unwrap();

        let output = ReadFileTool::new()
            .execute(
                CancellationToken::new(),
                serde_json::json!({ "path": file_path.to_str().unwrap(), "offset": 2, "limit": 2 }),
            )
            .await;

        assert_eq!(output.content, "two\nthree");
    }

    #[tokio::test]
    async fn read_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = ReadFileTool::new()
            .execute(
                CancellationToken::new(),
                serde_json::json!({ "path": dir.path().join("missing.txt").to_str().unwrap() }),
            )
            .await;

        assert!(output.is_error);
        assert!(output.content.contains("Failed to read file"));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let output = ReadFileTool::new()
            .execute(CancellationToken::new(), serde_json::json!({}))
            .await;
        assert!(output.is_error);
    }
}
