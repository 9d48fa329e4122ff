//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via typed SSE events; tool arguments complete on
//!   `content_block_stop`

use async_trait::async_trait;
use codeloop_core::error::ProviderError;
use codeloop_core::message::{Content, Message, Role};
use codeloop_core::provider::{ChatRequest, EventStream, Provider, ProviderEvent, ToolDefinition, Usage};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::assembler::ToolCallAssembler;
use crate::sse::{StreamParser, error_for_status, spawn_event_pump, transport_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: String,
    context_window: Option<u32>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            context_window: None,
            client: crate::http_client(),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the context window derived from the model name.
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: msg.content.iter().map(ContentBlock::from_content).collect(),
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn request_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> u32 {
        self.context_window
            .unwrap_or_else(|| crate::context_window_for(&self.model))
    }

    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<EventStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response.map_err(transport_error)?,
        };

        let response = error_for_status(response, "anthropic").await?;

        Ok(spawn_event_pump(
            response.bytes_stream(),
            AnthropicStreamState::default(),
            cancel,
        ))
    }
}

/// The Anthropic streaming state machine.
///
/// Text deltas are forwarded as they arrive. A tool call opens on
/// `content_block_start`, accumulates `input_json_delta` fragments and is
/// emitted on the matching `content_block_stop`.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    calls: ToolCallAssembler,
    usage: Usage,
    done: bool,
}

impl AnthropicStreamState {
    fn done_event(&mut self) -> ProviderEvent {
        self.done = true;
        self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
        ProviderEvent::Done(self.usage)
    }

    fn flush(&mut self, events: &mut Vec<ProviderEvent>) {
        events.extend(
            self.calls
                .finish_all()
                .into_iter()
                .map(ProviderEvent::ToolCallDone),
        );
    }
}

impl StreamParser for AnthropicStreamState {
    fn on_data(&mut self, data: &str) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return events;
            }
        };

        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.prompt_tokens = token_count(&usage["input_tokens"])
                    + token_count(&usage["cache_read_input_tokens"])
                    + token_count(&usage["cache_creation_input_tokens"]);
                self.usage.completion_tokens = token_count(&usage["output_tokens"]);
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.calls
                        .append(index, block["id"].as_str(), block["name"].as_str(), "");
                } else if let Some(text) = block["text"].as_str()
                    && !text.is_empty()
                {
                    events.push(ProviderEvent::TextDelta(text.to_string()));
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str()
                            && !text.is_empty()
                        {
                            events.push(ProviderEvent::TextDelta(text.to_string()));
                        }
                    }
                    "input_json_delta" => {
                        let fragment = delta["partial_json"].as_str().unwrap_or("");
                        self.calls.append(index, None, None, fragment);
                    }
                    // thinking / signature deltas are not surfaced
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(call) = self.calls.finish(index) {
                    events.push(ProviderEvent::ToolCallDone(call));
                }
            }
            "message_delta" => {
                let output = token_count(&event["usage"]["output_tokens"]);
                if output > 0 {
                    self.usage.completion_tokens = output;
                }
            }
            "message_stop" => {
                self.flush(&mut events);
                events.push(self.done_event());
            }
            "error" => {
                self.done = true;
                events.push(ProviderEvent::Error(stream_error(&event["error"])));
            }
            _ => {}
        }

        events
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if !self.done {
            self.flush(&mut events);
            events.push(self.done_event());
        }
        events
    }
}

fn token_count(value: &serde_json::Value) -> u32 {
    value.as_u64().map(|n| n.min(u32::MAX as u64) as u32).unwrap_or(0)
}

/// Map an in-stream `error` event.
fn stream_error(error: &serde_json::Value) -> ProviderError {
    let message = error["message"].as_str().unwrap_or("unknown error").to_string();
    match error["type"].as_str().unwrap_or("") {
        "overloaded_error" => ProviderError::ApiError {
            status_code: 529,
            message,
        },
        "rate_limit_error" => ProviderError::RateLimited { retry_after_secs: 5 },
        "authentication_error" | "permission_error" => ProviderError::AuthenticationFailed(message),
        "not_found_error" => ProviderError::ModelNotFound(message),
        "api_error" => ProviderError::ApiError {
            status_code: 500,
            message,
        },
        _ => ProviderError::ApiError {
            status_code: 400,
            message,
        },
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

impl ContentBlock {
    fn from_content(content: &Content) -> Self {
        match content {
            Content::Text { text } => Self::Text { text: text.clone() },
            Content::ToolUse { id, name, input } => Self::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: if input.is_object() {
                    input.clone()
                } else {
                    // The API only accepts objects; keep malformed input visible
                    serde_json::json!({ "raw": input })
                },
            },
            Content::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            },
            Content::Image { media_type, data } => Self::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}
