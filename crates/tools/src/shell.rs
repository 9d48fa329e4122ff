//! Bash tool: execute shell commands in the workspace.
//!
//! Whether a command may run at all is the permission policy's job; this
//! tool only runs it, honouring cancellation by killing the child process.

use std::path::PathBuf;

use async_trait::async_trait;
use codeloop_core::tool::{PermissionLevel, Tool, ToolOutput};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Execute shell commands.
#[derive(Debug, Default)]
pub struct BashTool {
    /// Directory commands run in; the process cwd when unset.
    working_dir: Option<PathBuf>,
}

impl BashTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout/stderr. Use this for running builds and tests, inspecting the repository, git operations, etc."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Execute
    }

    async fn execute(&self, cancel: CancellationToken, input: serde_json::Value) -> ToolOutput {
        let Some(command) = input["command"].as_str() else {
            return ToolOutput::error("Missing 'command' argument");
        };

        debug!(command = %command, "Executing shell command");

        // Dropping the output future kills the child (kill_on_drop)
        let output = tokio::select! {
            _ = cancel.cancelled() => return ToolOutput::error("Command cancelled"),
            output = self.command(command).output() => output,
        };

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if output.status.success() {
                    let text = if stderr.trim().is_empty() {
                        stdout.to_string()
                    } else {
                        format!("{stdout}\n[stderr]: {stderr}")
                    };
                    ToolOutput::success(text.trim().to_string())
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    warn!(command = %command, exit_code = code, "Command failed");
                    ToolOutput::error(
                        format!("[exit code: {code}]\n{stdout}\n{stderr}")
                            .trim()
                            .to_string(),
                    )
                }
            }
            Err(e) => ToolOutput::error(format!("Failed to spawn command: {e}")),
        }
    }
}
