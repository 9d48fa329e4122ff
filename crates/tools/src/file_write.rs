//! Write file tool: create or overwrite a file.
//!
//! The target path has already passed the policy's allow-path check by the
//! time this runs.

use async_trait::async_trait;
use codeloop_core::tool::{PermissionLevel, Tool, ToolOutput};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct WriteFileTool;

impl WriteFileTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file (and parent directories) if it doesn't exist, overwrites if it does."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Write
    }

    async fn execute(&self, _cancel: CancellationToken, input: serde_json::Value) -> ToolOutput {
        let Some(path) = input["path"].as_str() else {
            return ToolOutput::error("Missing 'path' argument");
        };
        let Some(content) = input["content"].as_str() else {
            return ToolOutput::error("Missing 'content' argument");
        };

        // Ensure parent directory exists
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolOutput::error(format!("Failed to create directory: {e}"));
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => ToolOutput::success(format!(
                "Successfully wrote {} bytes to {path}",
                content.len()
            )),
            Err(e) => ToolOutput::error(format!("Failed to write file: {e}")),
        }
    }
}
