//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider turns one vendor's streaming chat API into a uniform sequence
//! of [`ProviderEvent`]s delivered over a bounded channel. A background task
//! owned by the provider pumps that channel; it always closes it, whether the
//! stream ends normally, fails, or is cancelled.
//!
//! Implementations: Anthropic Messages API, OpenAI-compatible chat completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolCallRequest;

/// Capacity of the event channel between a provider task and its consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One outgoing chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,

    /// System prompt, sent out-of-band from the messages
    #[serde(default)]
    pub system: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.0
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A normalized streaming event.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A text fragment, forwarded as soon as it arrives.
    TextDelta(String),
    /// A fully reassembled tool call.
    ToolCallDone(ToolCallRequest),
    /// End of a successful response. Emitted exactly once, last.
    Done(Usage),
    /// The stream failed; no further events follow.
    Error(ProviderError),
}

/// The receiving half of a provider's event channel.
pub type EventStream = mpsc::Receiver<ProviderEvent>;

/// The core Provider trait.
///
/// The agent loop calls `chat()` without knowing which vendor is behind it.
/// An `Err` from `chat()` itself means nothing was streamed yet, so the
/// caller may retry it; errors inside the stream arrive as
/// [`ProviderEvent::Error`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// The model used when the configuration does not name one.
    fn default_model(&self) -> &str;

    /// Context window size in tokens for the configured model.
    fn context_window(&self) -> u32;

    /// Start a streaming chat call.
    ///
    /// Cancelling `cancel` makes the background task emit a
    /// `ProviderEvent::Error(ProviderError::Cancelled)` (if the receiver is
    /// still listening) and close the channel.
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<EventStream, ProviderError>;
}
