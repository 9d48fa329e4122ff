//! Session: the durable conversation state.
//!
//! A session is created once per conversation (or reloaded from a store),
//! mutated only by the agent loop and explicit user commands, and saved
//! before the process exits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;
use crate::provider::Usage;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cumulative token counters across the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounters {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenCounters {
    pub fn add(&mut self, usage: &Usage) {
        self.prompt += u64::from(usage.prompt_tokens);
        self.completion += u64::from(usage.completion_tokens);
        self.total += u64::from(usage.total_tokens);
    }
}

/// The last exact prompt size reported by a provider, together with the
/// number of history messages that prompt covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedPrompt {
    pub tokens: u32,
    pub message_count: usize,
}

/// A conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// Ordered history
    pub messages: Vec<Message>,

    /// Rolling summary of history discarded by full compaction
    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub usage: TokenCounters,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set once gentle masking ran; cleared by the next full compaction.
    #[serde(default)]
    pub gentle_masked: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reported_prompt: Option<ReportedPrompt>,
}

impl Session {
    /// Create a new empty session.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            messages: Vec::new(),
            summary: String::new(),
            usage: TokenCounters::default(),
            created_at: now,
            updated_at: now,
            gentle_masked: false,
            last_reported_prompt: None,
        }
    }

    /// Append a message to the history.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Replace the whole history (used by compaction and `/clear`).
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.updated_at = Utc::now();
        self.messages = messages;
        self.last_reported_prompt = None;
    }

    /// Record the usage of one provider call.
    ///
    /// `message_count` is the number of history messages the prompt was
    /// built from, so later estimates only need to cover what came after.
    pub fn record_usage(&mut self, usage: &Usage, message_count: usize) {
        self.usage.add(usage);
        if usage.prompt_tokens > 0 {
            self.last_reported_prompt = Some(ReportedPrompt {
                tokens: usage.prompt_tokens,
                message_count,
            });
        }
        self.updated_at = Utc::now();
    }

    /// Drop history, summary and compaction state but keep counters.
    pub fn clear(&mut self) {
        self.replace_history(Vec::new());
        self.summary.clear();
        self.gentle_masked = false;
    }

    /// A short listing entry for this session.
    pub fn summary_entry(&self) -> SessionSummary {
        let title = self
            .messages
            .iter()
            .find(|m| m.role == crate::message::Role::User && m.has_text())
            .map(|m| {
                let text = m.text();
                let mut title: String = text.chars().take(60).collect();
                if text.chars().count() > 60 {
                    title.push('…');
                }
                title
            })
            .unwrap_or_default();

        SessionSummary {
            id: self.id.clone(),
            title,
            message_count: self.messages.len(),
            total_tokens: self.usage.total,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry returned by `Store::list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
