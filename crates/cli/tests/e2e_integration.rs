//! End-to-end tests for the codeloop runtime.
//!
//! These drive a full turn through the agent loop with a scripted provider
//! and the real executor, permission policy, reference tools and stores.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codeloop_agent::{AgentLoop, Compactor, TurnOutcome};
use codeloop_agent::context::Summarizer;
use codeloop_config::PermissionsConfig;
use codeloop_core::error::ProviderError;
use codeloop_core::event::{AgentEvent, Confirmer, EventBus, StaticConfirmer};
use codeloop_core::message::{Content, Message, Role};
use codeloop_core::provider::{
    ChatRequest, EVENT_CHANNEL_CAPACITY, EventStream, Provider, ProviderEvent, Usage,
};
use codeloop_core::session::Session;
use codeloop_core::store::Store;
use codeloop_core::tool::{PermissionLevel, Tool, ToolCallRequest, ToolOutput};
use codeloop_security::PermissionPolicy;
use codeloop_store::{FileStore, InMemoryStore};
use codeloop_tools::{ToolExecutor, default_registry};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Scripted provider ────────────────────────────────────────────────────

/// Plays back one list of events per `chat()` call.
struct ScriptedProvider {
    responses: Mutex<VecDeque<Vec<ProviderEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ChatRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> u32 {
        200_000
    }

    async fn chat(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let Some(events) = self.responses.lock().unwrap().pop_front() else {
            return Err(ProviderError::InvalidResponse("scripted provider exhausted".into()));
        };
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

struct NoSummary;

#[async_trait]
impl Summarizer for NoSummary {
    async fn summarize(
        &self,
        _previous: &str,
        _history: &[Message],
        _cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::InvalidResponse("not used in these tests".into()))
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 100,
        completion_tokens: 20,
        total_tokens: 120,
    }
}

fn text_response(text: &str) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::TextDelta(text.to_string()),
        ProviderEvent::Done(usage()),
    ]
}

fn tool_response(calls: Vec<ToolCallRequest>) -> Vec<ProviderEvent> {
    let mut events: Vec<ProviderEvent> = calls.into_iter().map(ProviderEvent::ToolCallDone).collect();
    events.push(ProviderEvent::Done(usage()));
    events
}

fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        input,
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    agent: AgentLoop,
    provider: Arc<ScriptedProvider>,
    bus: Arc<EventBus>,
}

fn permissions() -> PermissionsConfig {
    PermissionsConfig::default()
}

fn harness_with(
    responses: Vec<Vec<ProviderEvent>>,
    permissions: PermissionsConfig,
    workspace: &std::path::Path,
    confirmer: Arc<dyn Confirmer>,
    extra: Vec<Arc<dyn Tool>>,
) -> Harness {
    let provider = Arc::new(ScriptedProvider::new(responses));
    let policy = Arc::new(PermissionPolicy::new(&permissions).with_workspace_root(workspace));
    let mut registry = default_registry(Some(workspace.to_path_buf()));
    for tool in extra {
        registry.register(tool);
    }
    let executor = Arc::new(ToolExecutor::new(registry, policy, confirmer));
    let bus = Arc::new(EventBus::default());
    let agent = AgentLoop::new(
        provider.clone(),
        executor,
        Compactor::new(Arc::new(NoSummary)),
        bus.clone(),
    );
    Harness {
        agent,
        provider,
        bus,
    }
}

fn harness(responses: Vec<Vec<ProviderEvent>>, workspace: &std::path::Path) -> Harness {
    harness_with(
        responses,
        permissions(),
        workspace,
        Arc::new(StaticConfirmer(true)),
        Vec::new(),
    )
}

/// Tool results in the last user message, as (id, content, is_error).
fn results_of(message: &Message) -> Vec<(String, String, bool)> {
    message
        .content
        .iter()
        .filter_map(|c| match c {
            Content::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id.clone(), content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

/// Every tool_use id is answered by a tool_result in the next message.
fn assert_paired(session: &Session) {
    for (i, message) in session.messages.iter().enumerate() {
        let ids: Vec<&str> = message.tool_use_ids().collect();
        if ids.is_empty() {
            continue;
        }
        let next = session
            .messages
            .get(i + 1)
            .unwrap_or_else(|| panic!("tool_use at {i} has no following message"));
        let answered: Vec<&str> = next.tool_result_ids().collect();
        assert_eq!(ids, answered, "tool_use at {i} is not fully answered");
    }
}

// ── Turns ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_plain_answer_is_one_provider_call() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(vec![text_response("Hello! How can I help?")], dir.path());
    let mut events = h.bus.subscribe();
    let mut session = Session::new();

    let report = h
        .agent
        .run_turn(&mut session, "hi", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.provider_calls, 1);
    assert_eq!(report.tool_calls, 0);
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].text(), "Hello! How can I help?");
    assert_eq!(session.usage.total, 120);

    let request = h.provider.last_request();
    assert!(request.tools.iter().any(|t| t.name == "bash"));
    assert!(request.tools.iter().any(|t| t.name == "write_file"));

    let mut saw_done = false;
    while let Ok(event) = events.try_recv() {
        if let AgentEvent::TextDone { text } = event.as_ref() {
            assert_eq!(text, "Hello! How can I help?");
            saw_done = true;
        }
    }
    assert!(saw_done);
}

#[tokio::test]
async fn e2e_write_then_read_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes/todo.txt");
    let path_str = path.to_str().unwrap().to_string();

    let h = harness(
        vec![
            tool_response(vec![call(
                "w1",
                "write_file",
                json!({"path": path_str, "content": "ship it\n"}),
            )]),
            tool_response(vec![call("r1", "read_file", json!({"path": path_str}))]),
            text_response("The file says: ship it"),
        ],
        dir.path(),
    );
    let mut session = Session::new();

    let report = h
        .agent
        .run_turn(&mut session, "write a todo and read it back", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.tool_calls, 2);
    assert_eq!(h.provider.calls(), 3);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "ship it\n");

    // user, assistant(write), results, assistant(read), results, assistant(text)
    assert_eq!(session.messages.len(), 6);
    let read = results_of(&session.messages[4]);
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].0, "r1");
    assert!(!read[0].2);
    assert!(read[0].1.contains("ship it"));
    assert_paired(&session);
}

#[tokio::test]
async fn e2e_max_iterations_stops_with_one_message() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "x").unwrap();
    let read = |id: &str| {
        tool_response(vec![call(id, "read_file", json!({"path": file.to_str().unwrap()}))])
    };

    let mut h = harness(vec![read("c1"), read("c2"), read("c3")], dir.path());
    h.agent = h.agent.with_max_iterations(2);
    let mut events = h.bus.subscribe();
    let mut session = Session::new();

    let report = h
        .agent
        .run_turn(&mut session, "loop", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::MaxIterations);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.tool_calls, 1);
    assert_eq!(h.provider.calls(), 2);
    assert_paired(&session);

    let mut notices = 0;
    while let Ok(event) = events.try_recv() {
        if let AgentEvent::System { message } = event.as_ref()
            && message.contains("Reached max iterations")
        {
            notices += 1;
        }
    }
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn e2e_repeated_calls_stop_the_turn() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("same.txt");
    std::fs::write(&file, "unchanged").unwrap();
    let input = json!({"path": file.to_str().unwrap()});
    // Fresh id every time; only the content repeats
    let responses = (0..6)
        .map(|i| tool_response(vec![call(&format!("c{i}"), "read_file", input.clone())]))
        .collect();

    let h = harness(responses, dir.path());
    let mut session = Session::new();
    let report = h
        .agent
        .run_turn(&mut session, "read it", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::DoomLoopStopped);
    assert_eq!(h.provider.calls(), 5);
    assert_eq!(report.tool_calls, 4);
    assert_paired(&session);

    // The hint rides along with the third round of results
    let hinted = session
        .messages
        .iter()
        .filter(|m| m.role == Role::User && m.has_text() && !results_of(m).is_empty())
        .count();
    assert_eq!(hinted, 1);
}

/// Cancels the turn from inside a tool call, like Ctrl-C mid-turn.
struct CtrlCTool {
    token: CancellationToken,
}

#[async_trait]
impl Tool for CtrlCTool {
    fn name(&self) -> &str {
        "ctrl_c"
    }

    fn description(&self) -> &str {
        "Interrupts the turn"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Read
    }

    async fn execute(&self, _cancel: CancellationToken, _input: serde_json::Value) -> ToolOutput {
        self.token.cancel();
        ToolOutput::success("interrupted")
    }
}

#[tokio::test]
async fn e2e_interrupt_keeps_history_paired() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("never.txt");
    let cancel = CancellationToken::new();

    let mut config = permissions();
    config.auto_approve_tools.push("ctrl_c".into());
    let h = harness_with(
        vec![tool_response(vec![
            call("c1", "ctrl_c", json!({})),
            call("c2", "write_file", json!({"path": target.to_str().unwrap(), "content": "x"})),
        ])],
        config,
        dir.path(),
        Arc::new(StaticConfirmer(true)),
        vec![Arc::new(CtrlCTool {
            token: cancel.clone(),
        }) as Arc<dyn Tool>],
    );
    let mut session = Session::new();

    let report = h.agent.run_turn(&mut session, "go", &cancel).await.unwrap();

    assert_eq!(report.outcome, TurnOutcome::Interrupted);
    assert_eq!(report.tool_calls, 1);
    assert!(!target.exists());
    assert_paired(&session);

    let results = results_of(session.messages.last().unwrap());
    assert_eq!(results[0].1, "interrupted");
    assert!(results[1].2);
    assert!(results[1].1.contains("interrupted by the user"));

    // The session stays usable after an interrupt
    let h2 = harness(vec![text_response("ok")], dir.path());
    let report = h2
        .agent
        .run_turn(&mut session, "continue", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_paired(&session);
}

// ── Permissions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_denied_command_never_runs() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let command = format!("sudo touch {}", marker.display());

    let h = harness(
        vec![
            tool_response(vec![call("c1", "bash", json!({"command": command}))]),
            text_response("I can't do that."),
        ],
        dir.path(),
    );
    let mut session = Session::new();
    h.agent
        .run_turn(&mut session, "use sudo", &CancellationToken::new())
        .await
        .unwrap();

    let results = results_of(&session.messages[2]);
    assert!(results[0].2);
    assert!(results[0].1.starts_with("Permission denied"));
    assert!(results[0].1.contains("sudo"));
    assert!(!marker.exists());
}

#[tokio::test]
async fn e2e_declined_confirmation_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.txt");

    let h = harness_with(
        vec![
            tool_response(vec![call(
                "c1",
                "write_file",
                json!({"path": target.to_str().unwrap(), "content": "data"}),
            )]),
            text_response("Okay, I won't write it."),
        ],
        permissions(),
        dir.path(),
        Arc::new(StaticConfirmer(false)),
        Vec::new(),
    );
    let mut session = Session::new();
    let report = h
        .agent
        .run_turn(&mut session, "write out.txt", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, TurnOutcome::Completed);
    let results = results_of(&session.messages[2]);
    assert!(results[0].2);
    assert!(results[0].1.contains("the user declined this write_file call"));
    assert!(!target.exists());
}

#[tokio::test]
async fn e2e_write_outside_allowed_paths_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let inside = dir.path().join("src/lib.rs");
    let outside = tempfile::tempdir().unwrap();
    let escaped = outside.path().join("evil.txt");

    let mut config = permissions();
    config.allowed_paths = vec!["./src/**".into()];
    config.unrestricted = true;
    let h = harness_with(
        vec![
            tool_response(vec![
                call("c1", "write_file", json!({"path": inside.to_str().unwrap(), "content": "ok"})),
                call("c2", "write_file", json!({"path": escaped.to_str().unwrap(), "content": "no"})),
            ]),
            text_response("done"),
        ],
        config,
        dir.path(),
        Arc::new(StaticConfirmer(true)),
        Vec::new(),
    );
    let mut session = Session::new();
    h.agent
        .run_turn(&mut session, "write both", &CancellationToken::new())
        .await
        .unwrap();

    let results = results_of(&session.messages[2]);
    assert!(!results[0].2, "{}", results[0].1);
    assert!(results[1].2);
    assert!(results[1].1.contains("outside the allowed paths"));
    assert!(inside.exists());
    assert!(!escaped.exists());
}

// ── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_session_survives_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("sessions"));
    let file = dir.path().join("readme.md");
    std::fs::write(&file, "# Title\n").unwrap();

    let h = harness(
        vec![
            tool_response(vec![call("c1", "read_file", json!({"path": file.to_str().unwrap()}))]),
            text_response("It is a title."),
        ],
        dir.path(),
    );
    let mut session = Session::new();
    h.agent
        .run_turn(&mut session, "what's in the readme?", &CancellationToken::new())
        .await
        .unwrap();
    store.save(&session).await.unwrap();

    let loaded = store.load(session.id.as_str()).await.unwrap();
    assert_eq!(loaded.messages, session.messages);
    assert_eq!(loaded.usage, session.usage);
    assert_paired(&loaded);

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, session.id);

    // Resume: the next request carries the whole saved history
    let mut resumed = loaded;
    let h2 = harness(vec![text_response("Anything else?")], dir.path());
    h2.agent
        .run_turn(&mut resumed, "thanks", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h2.provider.last_request().messages.len(), 5);

    store.delete(session.id.as_str()).await.unwrap();
    assert!(store.load(session.id.as_str()).await.is_err());
}

#[tokio::test]
async fn e2e_in_memory_store_keeps_sessions_apart() {
    let store = InMemoryStore::new();
    let mut a = Session::new();
    a.push(Message::user("first"));
    let mut b = Session::new();
    b.push(Message::user("second"));

    store.save(&a).await.unwrap();
    store.save(&b).await.unwrap();
    assert_eq!(store.len().await, 2);
    assert_eq!(store.load(a.id.as_str()).await.unwrap().messages[0].text(), "first");
    assert_eq!(store.load(b.id.as_str()).await.unwrap().messages[0].text(), "second");
}
