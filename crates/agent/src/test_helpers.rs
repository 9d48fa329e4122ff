//! Shared test helpers: scripted providers, mock tools and summarizers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use codeloop_core::error::ProviderError;
use codeloop_core::message::Message;
use codeloop_core::provider::{
    ChatRequest, EVENT_CHANNEL_CAPACITY, EventStream, Provider, ProviderEvent, Usage,
};
use codeloop_core::tool::{PermissionLevel, Tool, ToolCallRequest, ToolOutput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::Summarizer;

/// What one `chat()` call does.
pub enum Script {
    /// Stream these events, then close.
    Events(Vec<ProviderEvent>),
    /// Fail before streaming anything.
    Fail(ProviderError),
    /// Stream these events, then wait for cancellation.
    Hang(Vec<ProviderEvent>),
}

/// A provider that plays back one script per call.
///
/// Once the scripts run out every call fails with `InvalidResponse`.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    context_window: u32,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self::from_scripts(scripts.into_iter().map(Script::Events).collect())
    }

    pub fn from_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            context_window: 200_000,
        }
    }

    pub fn with_context_window(mut self, window: u32) -> Self {
        self.context_window = window;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        let (events, hang) = match script {
            Some(Script::Events(events)) => (events, false),
            Some(Script::Hang(events)) => (events, true),
            Some(Script::Fail(error)) => return Err(error),
            None => {
                return Err(ProviderError::InvalidResponse(
                    "no more scripted responses".into(),
                ));
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if hang {
                cancel.cancelled().await;
                let _ = tx.send(ProviderEvent::Error(ProviderError::Cancelled)).await;
            }
        });
        Ok(rx)
    }
}

pub fn usage(prompt: u32, completion: u32) -> Usage {
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    }
}

/// A response with text only.
pub fn text_script(text: &str) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::TextDelta(text.to_string()),
        ProviderEvent::Done(usage(10, 5)),
    ]
}

/// A response requesting `calls`.
pub fn tool_script(calls: Vec<ToolCallRequest>) -> Vec<ProviderEvent> {
    let mut events: Vec<ProviderEvent> = calls.into_iter().map(ProviderEvent::ToolCallDone).collect();
    events.push(ProviderEvent::Done(usage(10, 5)));
    events
}

pub fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        input,
    }
}

/// Echoes `input.text`; counts invocations.
#[derive(Default)]
pub struct EchoTool {
    pub calls: AtomicUsize,
}

impl EchoTool {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its text argument"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Read
    }

    async fn execute(&self, _cancel: CancellationToken, input: serde_json::Value) -> ToolOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ToolOutput::success(input["text"].as_str().unwrap_or_default())
    }
}

/// Cancels the given token when run, simulating Ctrl-C mid-batch.
pub struct InterruptTool {
    pub token: CancellationToken,
}

#[async_trait]
impl Tool for InterruptTool {
    fn name(&self) -> &str {
        "interrupt"
    }

    fn description(&self) -> &str {
        "Cancels the running turn"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Read
    }

    async fn execute(&self, _cancel: CancellationToken, _input: serde_json::Value) -> ToolOutput {
        self.token.cancel();
        ToolOutput::success("interrupted")
    }
}

/// Blocks until its own cancellation token fires.
pub struct BlockingTool;

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "block"
    }

    fn description(&self) -> &str {
        "Waits until cancelled"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Read
    }

    async fn execute(&self, cancel: CancellationToken, _input: serde_json::Value) -> ToolOutput {
        cancel.cancelled().await;
        ToolOutput::error("stopped")
    }
}

/// Returns a fixed summary (or error) and records what it was given.
pub struct FixedSummarizer {
    reply: Result<String, ProviderError>,
    pub seen: Mutex<Vec<(String, usize)>>,
}

impl FixedSummarizer {
    pub fn ok(summary: &str) -> Self {
        Self {
            reply: Ok(summary.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err(ProviderError::Network("summarizer offline".into())),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(
        &self,
        previous: &str,
        history: &[Message],
        _cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        self.seen
            .lock()
            .unwrap()
            .push((previous.to_string(), history.len()));
        self.reply.clone()
    }
}
