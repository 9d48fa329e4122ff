//! Rolling summary generation for full compaction.

use std::sync::Arc;

use async_trait::async_trait;
use codeloop_core::error::ProviderError;
use codeloop_core::message::{Content, Message, Role};
use codeloop_core::provider::{ChatRequest, Provider, ProviderEvent};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest slice of a single tool result copied into the transcript.
const MAX_RESULT_CHARS: usize = 2_000;

const SUMMARY_SYSTEM_PROMPT: &str = "You maintain the running summary of a coding session \
between a user and a coding agent. Keep it factual and dense: the user's goals, decisions \
made, files touched and why, commands run and their outcomes, open problems and next steps. \
Omit pleasantries. Reply with the summary only.";

/// Produces an updated summary from the previous one plus the history.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        previous: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError>;
}

/// Summarizes through the same provider the agent talks to.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        let model = provider.default_model().to_string();
        Self {
            provider,
            model,
            max_tokens: 2_048,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Render the history as a plain transcript.
pub fn render_transcript(history: &[Message]) -> String {
    let mut out = String::new();
    for message in history {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        for block in &message.content {
            match block {
                Content::Text { text } => out.push_str(&format!("{speaker}: {text}\n")),
                Content::ToolUse { name, input, .. } => {
                    out.push_str(&format!("[tool call] {name} {input}\n"));
                }
                Content::ToolResult {
                    content, is_error, ..
                } => {
                    let label = if *is_error { "tool error" } else { "tool result" };
                    let clipped: String = content.chars().take(MAX_RESULT_CHARS).collect();
                    out.push_str(&format!("[{label}] {clipped}\n"));
                }
                Content::Image { media_type, .. } => {
                    out.push_str(&format!("{speaker}: [image {media_type}]\n"));
                }
            }
        }
    }
    out
}

fn summary_request(previous: &str, history: &[Message]) -> String {
    let previous = if previous.trim().is_empty() {
        "(none)"
    } else {
        previous
    };
    format!(
        "Previous summary:\n{previous}\n\nConversation since then:\n{}\n\
         Write the updated summary covering both.",
        render_transcript(history)
    )
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(
        &self,
        previous: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: SUMMARY_SYSTEM_PROMPT.into(),
            messages: vec![Message::user(summary_request(previous, history))],
            tools: Vec::new(),
            max_tokens: Some(self.max_tokens),
            temperature: 0.0,
        };

        let mut events = self.provider.chat(request, cancel.child_token()).await?;
        let mut summary = String::new();
        while let Some(event) = events.recv().await {
            match event {
                ProviderEvent::TextDelta(text) => summary.push_str(&text),
                ProviderEvent::ToolCallDone(_) => {}
                ProviderEvent::Done(usage) => {
                    debug!(completion_tokens = usage.completion_tokens, "Summary generated");
                    let summary = summary.trim().to_string();
                    if summary.is_empty() {
                        return Err(ProviderError::InvalidResponse("empty summary".into()));
                    }
                    return Ok(summary);
                }
                ProviderEvent::Error(e) => return Err(e),
            }
        }
        Err(ProviderError::StreamInterrupted(
            "summary stream closed before completion".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, text_script};

    #[test]
    fn transcript_includes_every_block_kind() {
        let history = vec![
            Message::user("fix the build"),
            Message::new(
                Role::Assistant,
                vec![Content::ToolUse {
                    id: "c1".into(),
                    name: "bash".into(),
                    input: serde_json::json!({"command": "cargo check"}),
                }],
            ),
            Message::tool_results(vec![Content::tool_result("c1", "error[E0425]", true)]),
        ];
        let transcript = render_transcript(&history);
        assert!(transcript.contains("User: fix the build"));
        assert!(transcript.contains("[tool call] bash"));
        assert!(transcript.contains("[tool error] error[E0425]"));
    }

    #[test]
    fn long_results_are_clipped() {
        let history = vec![Message::tool_results(vec![Content::tool_result(
            "c1",
            "x".repeat(10_000),
            false,
        )])];
        assert!(render_transcript(&history).len() < 2_100);
    }

    #[tokio::test]
    async fn drains_stream_into_summary() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_script("User wants a fix.")]));
        let summarizer = ProviderSummarizer::new(provider.clone());
        let summary = summarizer
            .summarize("", &[Message::user("fix it")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, "User wants a fix.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].messages[0].text().contains("Previous summary:\n(none)"));
    }

    #[tokio::test]
    async fn stream_error_propagates() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![ProviderEvent::Error(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]]));
        let result = ProviderSummarizer::new(provider)
            .summarize("earlier", &[Message::user("x")], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn empty_summary_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_script("   ")]));
        let result = ProviderSummarizer::new(provider)
            .summarize("", &[Message::user("x")], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }
}
