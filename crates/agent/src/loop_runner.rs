//! The agent loop: one user turn from input to final answer.
//!
//! Each iteration compacts the context if needed, sends the compacted
//! history to the provider, streams the reply, and executes any requested
//! tool calls in order before looping. Every `tool_use` the model issues
//! ends up answered by a `tool_result`, including when the turn is cut
//! short by cancellation, the iteration limit or the doom-loop detector.

use std::sync::Arc;

use codeloop_config::AppConfig;
use codeloop_core::error::{Error, ProviderError};
use codeloop_core::event::{AgentEvent, EventBus};
use codeloop_core::message::{Content, Message, Role};
use codeloop_core::provider::{ChatRequest, EventStream, Provider, ProviderEvent, ToolDefinition, Usage};
use codeloop_core::session::Session;
use codeloop_core::tool::ToolCallRequest;
use codeloop_tools::ToolExecutor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::token::{estimate_tokens, estimate_tools_tokens};
use crate::context::{CompactionAction, Compactor, ProviderSummarizer, TokenBudget};
use crate::doom_loop::{DoomAction, DoomLoopDetector, STOP_STREAK, WARN_HINT};
use crate::retry::RetryPolicy;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are codeloop, a coding agent working inside the \
user's repository. Use the available tools to inspect files, run commands and make changes. \
Read before you edit, keep changes minimal and focused, and verify your work by running the \
relevant build or tests. When the task is done, reply with a short summary of what changed.";

const NOT_EXECUTED_INTERRUPTED: &str = "Not executed: the turn was interrupted by the user";
const NOT_EXECUTED_LIMIT: &str = "Not executed: the turn reached its iteration limit";
const NOT_EXECUTED_LOOP: &str = "Not executed: the same tool calls were repeated too many times";

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed,
    Interrupted,
    MaxIterations,
    DoomLoopStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Loop iterations started (one provider request each)
    pub iterations: u32,
    /// Tool calls actually executed
    pub tool_calls: usize,
    /// Provider `chat()` calls including retries
    pub provider_calls: u32,
}

/// One fully streamed assistant reply.
struct Reply {
    text: String,
    calls: Vec<ToolCallRequest>,
    usage: Usage,
}

enum Streamed {
    Complete(Reply),
    Interrupted {
        partial: String,
    },
    Failed {
        error: ProviderError,
        partial: String,
        content_seen: bool,
    },
}

/// The agent loop.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    compactor: Compactor,
    event_bus: Arc<EventBus>,
    model: String,
    system_prompt: String,
    /// 0 = unlimited
    max_iterations: u32,
    max_tokens: Option<u32>,
    temperature: f32,
    retry: RetryPolicy,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        compactor: Compactor,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let model = provider.default_model().to_string();
        Self {
            provider,
            executor,
            compactor,
            event_bus,
            model,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 50,
            max_tokens: None,
            temperature: 0.0,
            retry: RetryPolicy::default(),
        }
    }

    /// Wire an agent from the application config.
    ///
    /// Full compaction summarizes through the same provider and model.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let model = config
            .provider
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let summarizer = Arc::new(ProviderSummarizer::new(provider.clone()).with_model(model.clone()));
        let compactor = Compactor::from_config(&config.compaction, summarizer);
        let system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        Self::new(provider, executor, compactor, event_bus)
            .with_model(model)
            .with_system_prompt(system_prompt)
            .with_max_iterations(config.agent.max_iterations)
            .with_max_tokens(Some(config.provider.max_tokens))
            .with_temperature(config.provider.temperature)
            .with_retry_policy(RetryPolicy::from_config(&config.agent))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Abort only the tool call currently running; the turn carries on.
    pub fn cancel_current_tool(&self) -> bool {
        self.executor.cancel_current()
    }

    fn budget(&self, tools: &[ToolDefinition]) -> TokenBudget {
        TokenBudget::new(
            self.provider.context_window(),
            estimate_tokens(&self.system_prompt) + estimate_tools_tokens(tools),
        )
    }

    /// Estimated prompt size of the session and the window it must fit.
    pub fn context_usage(&self, session: &Session) -> (usize, usize) {
        let budget = self.budget(&self.executor.definitions());
        (self.compactor.usage(session, &budget), budget.context_window())
    }

    /// Force a full compaction (the `/compact` command).
    pub async fn compact_now(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<CompactionAction, ProviderError> {
        Ok(match self.compactor.full(session, cancel).await? {
            Some(dropped) => CompactionAction::Summarized {
                dropped_messages: dropped,
            },
            None => CompactionAction::None,
        })
    }

    /// Run one user turn.
    ///
    /// Returns `Err` only for provider failures that end the turn; the
    /// session stays usable either way.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, Error> {
        info!(session_id = %session.id, messages = session.messages.len(), "Starting turn");
        self.event_bus.publish(AgentEvent::UserMessage {
            text: input.to_string(),
        });
        session.push(Message::user(input));

        let tools = self.executor.definitions();
        let budget = self.budget(&tools);
        let mut doom = DoomLoopDetector::new();
        let mut report = TurnReport {
            outcome: TurnOutcome::Completed,
            iterations: 0,
            tool_calls: 0,
            provider_calls: 0,
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(self.interrupted(report));
            }
            report.iterations += 1;
            debug!(session_id = %session.id, iteration = report.iterations, "Agent loop iteration");

            match self.compactor.auto_compact(session, &budget, cancel).await {
                CompactionAction::Summarized { dropped_messages } => self.event_bus.system(format!(
                    "Compacted conversation: {dropped_messages} older messages folded into the summary"
                )),
                CompactionAction::Failed { reason } => {
                    self.event_bus.system(format!("Compaction skipped: {reason}"));
                }
                CompactionAction::Masked { .. } | CompactionAction::None => {}
            }
            if cancel.is_cancelled() {
                return Ok(self.interrupted(report));
            }

            let covered = session.messages.len();
            let request = ChatRequest {
                model: self.model.clone(),
                system: self.system_prompt.clone(),
                messages: self.compactor.compact_for_send(session, &budget),
                tools: tools.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };

            let reply = match self.call_provider(request, cancel, &mut report).await {
                Streamed::Complete(reply) => reply,
                Streamed::Interrupted { partial } => {
                    if !partial.is_empty() {
                        session.push(Message::assistant(partial));
                    }
                    return Ok(self.interrupted(report));
                }
                Streamed::Failed { error, partial, .. } => {
                    warn!(session_id = %session.id, error = %error, "Provider call failed, ending turn");
                    if !partial.is_empty() {
                        session.push(Message::assistant(partial));
                    }
                    self.event_bus.error(error.to_string());
                    return Err(error.into());
                }
            };

            session.record_usage(&reply.usage, covered);
            self.event_bus.publish(AgentEvent::TokenUsage {
                prompt_tokens: reply.usage.prompt_tokens,
                completion_tokens: reply.usage.completion_tokens,
                session_total: session.usage.total,
                context_window: self.provider.context_window(),
            });
            if !reply.text.is_empty() {
                self.event_bus.publish(AgentEvent::TextDone {
                    text: reply.text.clone(),
                });
            }

            let calls = reply.calls;
            let mut content = Vec::with_capacity(calls.len() + 1);
            if !reply.text.is_empty() {
                content.push(Content::text(reply.text));
            }
            content.extend(calls.iter().map(|c| Content::ToolUse {
                id: c.id.clone(),
                name: c.name.clone(),
                input: c.input.clone(),
            }));
            if !content.is_empty() {
                session.push(Message::new(Role::Assistant, content));
            }

            if calls.is_empty() {
                info!(
                    session_id = %session.id,
                    iterations = report.iterations,
                    tool_calls = report.tool_calls,
                    "Turn complete"
                );
                return Ok(report);
            }

            if self.max_iterations > 0 && report.iterations >= self.max_iterations {
                warn!(session_id = %session.id, max = self.max_iterations, "Max iterations reached");
                session.push(skipped_results(&calls, NOT_EXECUTED_LIMIT));
                self.event_bus.system(format!(
                    "Reached max iterations ({}); stopping this turn",
                    self.max_iterations
                ));
                report.outcome = TurnOutcome::MaxIterations;
                return Ok(report);
            }

            let action = doom.check(&calls);
            if action == DoomAction::Stop {
                warn!(session_id = %session.id, streak = doom.streak(), "Doom loop, stopping turn");
                session.push(skipped_results(&calls, NOT_EXECUTED_LOOP));
                self.event_bus.system(format!(
                    "Stopped: the model repeated the same tool calls {STOP_STREAK} times in a row"
                ));
                report.outcome = TurnOutcome::DoomLoopStopped;
                return Ok(report);
            }

            let mut results = Vec::with_capacity(calls.len() + 1);
            for call in &calls {
                if cancel.is_cancelled() {
                    results.push(Content::tool_result(&call.id, NOT_EXECUTED_INTERRUPTED, true));
                    continue;
                }
                self.event_bus.publish(AgentEvent::ToolStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
                let output = self.executor.execute(call, cancel).await;
                report.tool_calls += 1;
                self.event_bus.publish(AgentEvent::ToolDone {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: output.content.clone(),
                    is_error: output.is_error,
                });
                results.push(Content::tool_result(&call.id, output.content, output.is_error));
            }

            if action == DoomAction::Warn {
                warn!(session_id = %session.id, streak = doom.streak(), "Repeated tool calls, injecting hint");
                results.push(Content::text(WARN_HINT));
                self.event_bus
                    .system("The model is repeating the same tool calls; asked it to change approach");
            }
            session.push(Message::tool_results(results));

            if cancel.is_cancelled() {
                return Ok(self.interrupted(report));
            }
        }
    }

    fn interrupted(&self, mut report: TurnReport) -> TurnReport {
        info!(iterations = report.iterations, "Turn interrupted");
        self.event_bus.system("Interrupted");
        report.outcome = TurnOutcome::Interrupted;
        report
    }

    /// Call the provider, retrying failures that happen before any content.
    async fn call_provider(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
        report: &mut TurnReport,
    ) -> Streamed {
        let mut attempt = 0;
        loop {
            attempt += 1;
            report.provider_calls += 1;
            self.event_bus.publish(AgentEvent::ThinkingStarted);
            debug!(attempt, model = %self.model, messages = request.messages.len(), "Calling provider");

            let error = match self.provider.chat(request.clone(), cancel.child_token()).await {
                Ok(events) => match self.drain(events, cancel).await {
                    Streamed::Failed {
                        error,
                        content_seen: false,
                        ..
                    } if !cancel.is_cancelled() => error,
                    other => return other,
                },
                Err(_) if cancel.is_cancelled() => {
                    return Streamed::Interrupted {
                        partial: String::new(),
                    };
                }
                Err(error) => error,
            };

            if !self.retry.should_retry(attempt, &error) {
                return Streamed::Failed {
                    error,
                    partial: String::new(),
                    content_seen: false,
                };
            }

            let delay = self.retry.delay_for(attempt, &error);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Provider call failed, retrying"
            );
            self.event_bus.system(format!(
                "{error}; retrying in {:.1}s (attempt {}/{})",
                delay.as_secs_f32(),
                attempt + 1,
                self.retry.max_attempts()
            ));
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Streamed::Interrupted { partial: String::new() };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Consume one provider stream, forwarding text as it arrives.
    async fn drain(&self, mut events: EventStream, cancel: &CancellationToken) -> Streamed {
        let mut text = String::new();
        let mut calls = Vec::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Streamed::Interrupted { partial: text },
                event = events.recv() => event,
            };
            match event {
                Some(ProviderEvent::TextDelta(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.event_bus.publish(AgentEvent::TextDelta {
                        text: delta.clone(),
                    });
                    text.push_str(&delta);
                }
                Some(ProviderEvent::ToolCallDone(call)) => {
                    debug!(tool = %call.name, id = %call.id, "Tool call received");
                    calls.push(call);
                }
                Some(ProviderEvent::Done(usage)) => {
                    return Streamed::Complete(Reply { text, calls, usage });
                }
                Some(ProviderEvent::Error(ProviderError::Cancelled)) => {
                    return Streamed::Interrupted { partial: text };
                }
                Some(ProviderEvent::Error(error)) => {
                    let content_seen = !text.is_empty() || !calls.is_empty();
                    return Streamed::Failed {
                        error,
                        partial: text,
                        content_seen,
                    };
                }
                None => {
                    let content_seen = !text.is_empty() || !calls.is_empty();
                    return Streamed::Failed {
                        error: ProviderError::StreamInterrupted(
                            "stream closed before completion".into(),
                        ),
                        partial: text,
                        content_seen,
                    };
                }
            }
        }
    }
}

/// Error results for calls that were never run, keeping every `tool_use` paired.
fn skipped_results(calls: &[ToolCallRequest], reason: &str) -> Message {
    Message::tool_results(
        calls
            .iter()
            .map(|c| Content::tool_result(&c.id, reason, true))
            .collect(),
    )
}
