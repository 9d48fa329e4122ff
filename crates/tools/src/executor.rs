//! Tool executor: the gate every model-requested tool call passes through.
//!
//! Order of operations for one call:
//! 1. resolve the tool in the registry
//! 2. ask the permission policy; deny or confirm with a human
//! 3. run the tool under a per-call timeout and a per-call cancellation
//!    token nested inside the turn's token
//! 4. cap the output size
//!
//! Failures of any kind come back as an error [`ToolOutput`], never as a
//! Rust error, so the model always sees what happened.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use codeloop_config::ToolsConfig;
use codeloop_core::error::ToolError;
use codeloop_core::event::{ConfirmationRequest, Confirmer};
use codeloop_core::provider::ToolDefinition;
use codeloop_core::tool::{ToolCallRequest, ToolOutput, ToolRegistry};
use codeloop_security::{PermissionDecision, PermissionPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 30_000;

/// Applies the permission policy and resource limits around tool calls.
pub struct ToolExecutor {
    registry: ToolRegistry,
    policy: Arc<PermissionPolicy>,
    confirmer: Arc<dyn Confirmer>,
    timeout: Duration,
    max_output_bytes: usize,
    /// Token of the call currently running, if any
    current: Mutex<Option<CancellationToken>>,
}

impl ToolExecutor {
    pub fn new(
        registry: ToolRegistry,
        policy: Arc<PermissionPolicy>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            registry,
            policy,
            confirmer,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            current: Mutex::new(None),
        }
    }

    /// Apply the `[tools]` config section.
    pub fn with_limits(mut self, config: &ToolsConfig) -> Self {
        self.timeout = Duration::from_secs(config.timeout_secs);
        self.max_output_bytes = config.max_output_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<PermissionPolicy> {
        &self.policy
    }

    /// Cancel the call that is currently running, leaving the turn alive.
    ///
    /// Returns `false` when no call is in flight.
    pub fn cancel_current(&self) -> bool {
        match self.current_slot().as_ref() {
            Some(token) => {
                info!("Cancelling current tool call");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one tool call to completion.
    pub async fn execute(&self, call: &ToolCallRequest, turn_cancel: &CancellationToken) -> ToolOutput {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return ToolOutput::error(format!(
                "{}. Available tools: {}",
                ToolError::NotFound(call.name.clone()),
                self.registry.names().join(", ")
            ));
        };

        if !call.input.is_object() {
            return ToolOutput::error(
                ToolError::InvalidArguments(format!(
                    "{} expects a JSON object, got: {}",
                    call.name, call.input
                ))
                .to_string(),
            );
        }

        match self.policy.check(&call.name, &call.input) {
            PermissionDecision::Allow => {}
            PermissionDecision::Deny(reason) => {
                warn!(tool = %call.name, reason = %reason, "Tool call denied");
                return ToolOutput::error(format!("Permission denied: {reason}"));
            }
            PermissionDecision::NeedConfirmation => {
                let request = ConfirmationRequest {
                    tool_name: call.name.clone(),
                    input: call.input.clone(),
                    level: tool.permission_level(),
                };
                let approved = tokio::select! {
                    _ = turn_cancel.cancelled() => {
                        return ToolOutput::error(ToolError::Cancelled(call.name.clone()).to_string());
                    }
                    approved = self.confirmer.confirm(&request) => approved,
                };
                if !approved {
                    info!(tool = %call.name, "User declined tool call");
                    return ToolOutput::error(format!(
                        "Permission denied: the user declined this {} call",
                        call.name
                    ));
                }
                self.policy.record_approval(&call.name, &call.input);
            }
        }

        let call_cancel = turn_cancel.child_token();
        *self.current_slot() = Some(call_cancel.clone());

        debug!(tool = %call.name, id = %call.id, "Executing tool");
        let output = tokio::select! {
            biased;
            _ = call_cancel.cancelled() => {
                ToolOutput::error(ToolError::Cancelled(call.name.clone()).to_string())
            }
            result = tokio::time::timeout(
                self.timeout,
                tool.execute(call_cancel.clone(), call.input.clone()),
            ) => match result {
                Ok(output) => output,
                Err(_) => {
                    warn!(tool = %call.name, timeout_secs = self.timeout.as_secs(), "Tool call timed out");
                    // Lets a tool that spawned work observe the abort
                    call_cancel.cancel();
                    ToolOutput::error(
                        ToolError::Timeout {
                            tool_name: call.name.clone(),
                            timeout_secs: self.timeout.as_secs(),
                        }
                        .to_string(),
                    )
                }
            },
        };

        *self.current_slot() = None;

        ToolOutput {
            content: truncate_output(output.content, self.max_output_bytes),
            is_error: output.is_error,
        }
    }

    fn current_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cap `content` at `max` bytes on a UTF-8 boundary, noting what was cut.
pub fn truncate_output(content: String, max: usize) -> String {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let omitted = content.len() - end;
    format!("{}\n\n[output truncated: {omitted} bytes omitted]", &content[..end])
}
