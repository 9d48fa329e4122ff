//! Terminal rendering of agent events.

use std::io::Write;

use codeloop_core::event::{AgentEvent, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const MAX_PREVIEW: usize = 120;

/// Turns events into terminal text. Tracks whether a text stream is open
/// so tool lines start on a fresh line.
#[derive(Debug, Default)]
pub struct Renderer {
    streaming: bool,
    verbose: bool,
}

fn preview(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default();
    let mut out: String = first.chars().take(MAX_PREVIEW).collect();
    if first.chars().count() > MAX_PREVIEW {
        out.push('…');
    }
    let rest = lines.count();
    if rest > 0 {
        out.push_str(&format!(" (+{rest} lines)"));
    }
    out
}

impl Renderer {
    pub fn new(verbose: bool) -> Self {
        Self {
            streaming: false,
            verbose,
        }
    }

    fn break_stream(&mut self) -> &'static str {
        if std::mem::take(&mut self.streaming) {
            "\n"
        } else {
            ""
        }
    }

    pub fn format(&mut self, event: &AgentEvent) -> String {
        match event {
            AgentEvent::UserMessage { .. } => String::new(),
            AgentEvent::ThinkingStarted => {
                if self.verbose {
                    "  … thinking\n".into()
                } else {
                    String::new()
                }
            }
            AgentEvent::TextDelta { text } => {
                let lead = if self.streaming { "" } else { "\n" };
                self.streaming = true;
                format!("{lead}{text}")
            }
            AgentEvent::TextDone { .. } => format!("{}\n", self.break_stream()),
            AgentEvent::ToolStarted { name, input, .. } => {
                let args = input
                    .get("command")
                    .or_else(|| input.get("path"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| input.to_string());
                format!("{}  ⏺ {name}({})\n", self.break_stream(), preview(&args))
            }
            AgentEvent::ToolDone {
                output, is_error, ..
            } => {
                let label = if *is_error { "error: " } else { "" };
                format!("    ⎿ {label}{}\n", preview(output))
            }
            AgentEvent::System { message } => {
                format!("{}  [{message}]\n", self.break_stream())
            }
            AgentEvent::Error { message } => {
                format!("{}  [error] {message}\n", self.break_stream())
            }
            AgentEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
                session_total,
                context_window,
            } => {
                if self.verbose {
                    format!(
                        "  [tokens: prompt {prompt_tokens} / {context_window}, completion {completion_tokens}, session {session_total}]\n"
                    )
                } else {
                    String::new()
                }
            }
        }
    }
}

/// Print events from `bus` until it closes.
pub fn spawn_renderer(bus: &EventBus, verbose: bool) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let mut renderer = Renderer::new(verbose);
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let text = renderer.format(&event);
                    if !text.is_empty() {
                        let mut stdout = std::io::stdout();
                        let _ = stdout.write_all(text.as_bytes());
                        let _ = stdout.flush();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Renderer fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
