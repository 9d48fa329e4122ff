//! Agent events and the confirmation contract.
//!
//! The core never renders anything. It publishes semantic [`AgentEvent`]s on
//! an [`EventBus`] and asks a [`Confirmer`] whenever a tool call needs a
//! human decision. The surrounding shell subscribes and renders.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::tool::PermissionLevel;

/// All semantic events emitted during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Echo of the user input that started a turn
    UserMessage { text: String },

    /// A provider call has been issued
    ThinkingStarted,

    /// Partial text from the model
    TextDelta { text: String },

    /// The model finished its text for this provider call
    TextDone { text: String },

    ToolStarted {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolDone {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },

    /// Informational message from the runtime (interruptions, compaction, limits)
    System { message: String },

    Error { message: String },

    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
        session_total: u64,
        context_window: u32,
    },
}

/// A broadcast-based event bus for agent events.
///
/// Uses `tokio::sync::broadcast` so several observers (renderer, logger,
/// tests) can follow the same turn.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }

    pub fn system(&self, message: impl Into<String>) {
        self.publish(AgentEvent::System {
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(AgentEvent::Error {
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A tool call awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub level: PermissionLevel,
}

/// Asks a human whether a tool call may proceed.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// A confirmer that answers the same way every time.
pub struct StaticConfirmer(pub bool);

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        self.0
    }
}
