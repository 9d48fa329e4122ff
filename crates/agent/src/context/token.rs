//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Vendors report
//! exact prompt counts after each call; those take precedence over these
//! estimates wherever they are available (see [`super::compactor`]).

use codeloop_core::message::{Content, Message};
use codeloop_core::provider::ToolDefinition;

/// Flat cost charged for an image block.
pub const IMAGE_TOKENS: usize = 1000;

/// Per-message overhead for role and delimiters in the wire format.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for one content block.
pub fn estimate_content_tokens(content: &Content) -> usize {
    match content {
        Content::Text { text } => estimate_tokens(text),
        Content::ToolUse { name, input, .. } => {
            estimate_tokens(name) + estimate_tokens(&input.to_string())
        }
        Content::ToolResult { content, .. } => estimate_tokens(content),
        Content::Image { .. } => IMAGE_TOKENS,
    }
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD
        + message
            .content
            .iter()
            .map(estimate_content_tokens)
            .sum::<usize>()
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}
