//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/v1/chat/completions` with SSE streaming. Tool arguments arrive as
//! indexed fragments and are complete once a choice reports a
//! `finish_reason`.

use async_trait::async_trait;
use codeloop_core::error::ProviderError;
use codeloop_core::message::{Content, Message, Role};
use codeloop_core::provider::{ChatRequest, EventStream, Provider, ProviderEvent, ToolDefinition, Usage};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::assembler::ToolCallAssembler;
use crate::sse::{StreamParser, error_for_status, spawn_event_pump, transport_error};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    context_window: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            context_window: None,
            client: crate::http_client(),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", DEFAULT_BASE_URL, api_key)
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

    /// Convert our Message types to OpenAI API format.
    ///
    /// Tool results become separate `tool` role messages. Any text or
    /// images sharing a message with tool results follow them as a user
    /// message, so the pairing with the preceding assistant stays intact.
    fn to_api_messages(system: &str, messages: &[Message]) -> Vec<ApiMessage> {
        let mut result = Vec::new();

        if !system.is_empty() {
            result.push(ApiMessage::text("system", system));
        }

        for msg in messages {
            match msg.role {
                Role::Assistant => {
                    let text = msg.text();
                    let tool_calls: Vec<ApiToolCall> = msg
                        .content
                        .iter()
                        .filter_map(|c| match c {
                            Content::ToolUse { id, name, input } => Some(ApiToolCall {
                                id: id.clone(),
                                r#type: "function",
                                function: ApiFunction {
                                    name: name.clone(),
                                    arguments: match input {
                                        serde_json::Value::String(raw) => raw.clone(),
                                        other => other.to_string(),
                                    },
                                },
                            }),
                            _ => None,
                        })
                        .collect();

                    result.push(ApiMessage {
                        role: "assistant",
                        content: if text.is_empty() {
                            None
                        } else {
                            Some(ApiContent::Text(text))
                        },
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                        tool_call_id: None,
                    });
                }
                Role::User => {
                    let mut parts = Vec::new();
                    for content in &msg.content {
                        match content {
                            Content::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => result.push(ApiMessage {
                                role: "tool",
                                content: Some(ApiContent::Text(content.clone())),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            }),
                            Content::Text { text } => {
                                parts.push(ApiContentPart::Text { text: text.clone() })
                            }
                            Content::Image { media_type, data } => {
                                parts.push(ApiContentPart::ImageUrl {
                                    image_url: ApiImageUrl {
                                        url: format!("data:{media_type};base64,{data}"),
                                    },
                                })
                            }
                            Content::ToolUse { .. } => {}
                        }
                    }

                    if parts.is_empty() {
                        continue;
                    }
                    let content = match parts.as_slice() {
                        [ApiContentPart::Text { text }] => ApiContent::Text(text.clone()),
                        _ => ApiContent::Parts(parts),
                    };
                    result.push(ApiMessage {
                        role: "user",
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
            }
        }

        result
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.system, &request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response.map_err(transport_error)?,
        };

        let response = error_for_status(response, &self.name).await?;

        Ok(spawn_event_pump(
            response.bytes_stream(),
            OpenAiStreamState::default(),
            cancel,
        ))
    }
}

/// The OpenAI chat-completions streaming state machine.
///
/// Pending tool calls are flushed in first-appearance order when a choice
/// reports a `finish_reason`. Usage arrives in its own trailing chunk, so
/// `Done` waits for `[DONE]` or the end of the body.
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    calls: ToolCallAssembler,
    usage: Usage,
    done: bool,
}

impl OpenAiStreamState {
    fn flush(&mut self, events: &mut Vec<ProviderEvent>) {
        events.extend(
            self.calls
                .finish_all()
                .into_iter()
                .map(ProviderEvent::ToolCallDone),
        );
    }

    fn done_event(&mut self) -> ProviderEvent {
        self.done = true;
        if self.usage.total_tokens == 0 {
            self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
        }
        ProviderEvent::Done(self.usage)
    }
}

impl StreamParser for OpenAiStreamState {
    fn on_data(&mut self, data: &str) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        if data.trim() == "[DONE]" {
            self.flush(&mut events);
            events.push(self.done_event());
            return events;
        }

        let chunk: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable SSE chunk");
                return events;
            }
        };

        if let Some(error) = chunk.get("error").filter(|e| e.is_object()) {
            self.done = true;
            let message = error["message"].as_str().unwrap_or("unknown error").to_string();
            let status_code = error["code"]
                .as_u64()
                .map(|c| c.min(u16::MAX as u64) as u16)
                .unwrap_or(500);
            events.push(ProviderEvent::Error(ProviderError::ApiError {
                status_code,
                message,
            }));
            return events;
        }

        let usage = &chunk["usage"];
        if usage.is_object() {
            self.usage = Usage {
                prompt_tokens: token_count(&usage["prompt_tokens"]),
                completion_tokens: token_count(&usage["completion_tokens"]),
                total_tokens: token_count(&usage["total_tokens"]),
            };
        }

        let Some(choices) = chunk["choices"].as_array() else {
            return events;
        };

        for choice in choices {
            let delta = &choice["delta"];

            if let Some(text) = delta["content"].as_str()
                && !text.is_empty()
            {
                events.push(ProviderEvent::TextDelta(text.to_string()));
            }

            if let Some(tool_calls) = delta["tool_calls"].as_array() {
                for tc in tool_calls {
                    let index = tc["index"].as_u64().unwrap_or(0);
                    self.calls.append(
                        index,
                        tc["id"].as_str(),
                        tc["function"]["name"].as_str(),
                        tc["function"]["arguments"].as_str().unwrap_or(""),
                    );
                }
            }

            if choice["finish_reason"].is_string() {
                self.flush(&mut events);
            }
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

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &'static str, text: &str) -> Self {
        Self {
            role,
            content: Some(ApiContent::Text(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}
