//! Context compaction.
//!
//! Two destructive stages run between provider calls when usage grows:
//!
//! - **gentle** (≥70% of the window): mask old tool results in the stored
//!   history, once per growth cycle.
//! - **full** (≥80%): fold the history into the rolling summary and keep
//!   only the most recent turns.
//!
//! Independently, every outgoing request is built by [`Compactor::compact_for_send`],
//! which works on a copy and never touches the session.

use std::sync::Arc;

use codeloop_config::CompactionConfig;
use codeloop_core::error::ProviderError;
use codeloop_core::message::Message;
use codeloop_core::session::Session;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::budget::{CompactionStage, TokenBudget};
use super::mask::MaskPolicy;
use super::summarizer::Summarizer;
use super::token::{estimate_messages_tokens, estimate_tokens};
use super::turns::split_turns;

const SUMMARY_PREFIX: &str = "Summary of the conversation so far:";
const SUMMARY_ACK: &str = "Understood.";

/// What an automatic compaction check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionAction {
    None,
    Masked { results: usize },
    Summarized { dropped_messages: usize },
    Failed { reason: String },
}

pub struct Compactor {
    summarizer: Arc<dyn Summarizer>,
    mask: MaskPolicy,
    keep_turns: usize,
    min_turns: usize,
}

impl Compactor {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self::from_config(&CompactionConfig::default(), summarizer)
    }

    pub fn from_config(config: &CompactionConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            mask: MaskPolicy::from_config(config),
            keep_turns: config.keep_turns.max(1),
            min_turns: config.min_turns.max(1),
        }
    }

    pub fn with_mask_policy(mut self, mask: MaskPolicy) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_keep_turns(mut self, keep_turns: usize) -> Self {
        self.keep_turns = keep_turns.max(1);
        self
    }

    pub fn with_min_turns(mut self, min_turns: usize) -> Self {
        self.min_turns = min_turns.max(1);
        self
    }

    /// Current prompt size: system + history.
    ///
    /// The provider's last reported prompt count (plus an estimate of
    /// messages appended after it) only covers what was actually sent, which
    /// may have been trimmed. The stored history is always estimated too and
    /// the larger figure wins, so trimmed sends never hide stored growth.
    pub fn usage(&self, session: &Session, budget: &TokenBudget) -> usize {
        let summary = if session.summary.is_empty() {
            0
        } else {
            estimate_tokens(&session.summary)
        };
        let stored =
            budget.system_tokens() + summary + estimate_messages_tokens(&session.messages);

        match session.last_reported_prompt {
            Some(reported) if reported.message_count <= session.messages.len() => {
                let sent = reported.tokens as usize
                    + estimate_messages_tokens(&session.messages[reported.message_count..]);
                sent.max(stored)
            }
            _ => stored,
        }
    }

    /// Run whichever stage the current usage calls for.
    pub async fn auto_compact(
        &self,
        session: &mut Session,
        budget: &TokenBudget,
        cancel: &CancellationToken,
    ) -> CompactionAction {
        let used = self.usage(session, budget);
        let stage = budget.stage(used);
        debug!(used, window = budget.context_window(), ?stage, "Compaction check");

        if stage == CompactionStage::Full {
            match self.full(session, cancel).await {
                Ok(Some(dropped)) => {
                    return CompactionAction::Summarized {
                        dropped_messages: dropped,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Summarization failed, skipping compaction");
                    return CompactionAction::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        }

        if stage != CompactionStage::None && !session.gentle_masked {
            return CompactionAction::Masked {
                results: self.gentle(session),
            };
        }
        CompactionAction::None
    }

    /// Mask old tool results in the stored history and set the one-shot flag.
    pub fn gentle(&self, session: &mut Session) -> usize {
        let masked = self.mask.apply(&mut session.messages);
        session.gentle_masked = true;
        if masked > 0 {
            session.last_reported_prompt = None;
        }
        info!(session_id = %session.id, masked, "Masked old tool results");
        masked
    }

    /// Summarize and truncate to the last `keep_turns` turns.
    ///
    /// Returns `Ok(None)` when the history has no turns to discard.
    pub async fn full(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, ProviderError> {
        let turns = split_turns(&session.messages);
        if turns.len() <= self.keep_turns {
            debug!(turns = turns.len(), "Nothing to discard");
            return Ok(None);
        }

        let summary = self
            .summarizer
            .summarize(&session.summary, &session.messages, cancel)
            .await?;

        let retained: Vec<Message> = turns[turns.len() - self.keep_turns..]
            .iter()
            .flat_map(|turn| turn.iter().cloned())
            .collect();
        let dropped = session.messages.len() - retained.len();

        session.summary = summary;
        session.replace_history(retained);
        session.gentle_masked = false;
        info!(session_id = %session.id, dropped, "Compacted history into summary");
        Ok(Some(dropped))
    }

    /// The history to send: summary pair, masked results, oldest turns
    /// dropped while over budget. The session is not modified.
    pub fn compact_for_send(&self, session: &Session, budget: &TokenBudget) -> Vec<Message> {
        let has_summary = !session.summary.trim().is_empty();
        let mut history = Vec::with_capacity(session.messages.len() + 2);
        if has_summary {
            history.push(Message::user(format!("{SUMMARY_PREFIX}\n\n{}", session.summary)));
            history.push(Message::assistant(SUMMARY_ACK));
        }
        history.extend(session.messages.iter().cloned());
        self.mask.apply(&mut history);

        let max = budget.history_max();
        let mut total = estimate_messages_tokens(&history);
        if total <= max {
            return history;
        }

        let turns = split_turns(&history);
        let protected = usize::from(has_summary);
        let mut drop = vec![false; turns.len()];
        let mut remaining = turns.len();
        for (i, turn) in turns.iter().enumerate().skip(protected) {
            if total <= max || remaining <= self.min_turns {
                break;
            }
            total -= estimate_messages_tokens(turn);
            drop[i] = true;
            remaining -= 1;
        }

        let dropped = drop.iter().filter(|d| **d).count();
        if dropped > 0 {
            debug!(dropped_turns = dropped, remaining, "Dropped oldest turns for send");
        }
        turns
            .iter()
            .zip(drop)
            .filter(|(_, dropped)| !dropped)
            .flat_map(|(turn, _)| turn.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FixedSummarizer;
    use codeloop_core::message::{Content, Role};
    use codeloop_core::provider::Usage;

    fn turn(i: usize, output: &str) -> Vec<Message> {
        let id = format!("c{i}");
        vec![
            Message::user(format!("task {i}")),
            Message::new(
                Role::Assistant,
                vec![Content::ToolUse {
                    id: id.clone(),
                    name: "bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                }],
            ),
            Message::tool_results(vec![Content::tool_result(id, output, false)]),
            Message::assistant("done"),
        ]
    }

    fn session_with_turns(n: usize, output: &str) -> Session {
        let mut session = Session::new();
        for i in 0..n {
            for m in turn(i, output) {
                session.push(m);
            }
        }
        session
    }

    fn compactor(summarizer: Arc<FixedSummarizer>) -> Compactor {
        Compactor::new(summarizer)
            .with_mask_policy(MaskPolicy::default().with_keep_recent(2))
            .with_keep_turns(3)
            .with_min_turns(2)
    }

    #[test]
    fn send_compaction_does_not_mutate_session() {
        let mut session = session_with_turns(8, &"x".repeat(4_000));
        session.summary = "earlier".into();
        let before = session.messages.clone();
        let c = compactor(Arc::new(FixedSummarizer::ok("s")));

        let budget = TokenBudget::new(3_000, 0);
        let sent = c.compact_for_send(&session, &budget);

        assert_eq!(session.messages, before);
        assert_eq!(session.summary, "earlier");
        assert_ne!(sent, before);
    }

    #[test]
    fn send_compaction_prepends_summary() {
        let mut session = session_with_turns(1, "ok");
        session.summary = "user is refactoring the parser".into();
        let c = compactor(Arc::new(FixedSummarizer::ok("s")));
        let sent = c.compact_for_send(&session, &TokenBudget::new(200_000, 0));
        assert_eq!(sent.len(), 6);
        assert!(sent[0].text().contains("user is refactoring the parser"));
        assert_eq!(sent[1].text(), "Understood.");
    }

    #[test]
    fn send_compaction_drops_oldest_turns_but_keeps_summary_and_floor() {
        let mut session = session_with_turns(8, &"x".repeat(4_000));
        session.summary = "earlier".into();
        let c = compactor(Arc::new(FixedSummarizer::ok("s")));

        // Tiny budget: only the floor of turns survives
        let sent = c.compact_for_send(&session, &TokenBudget::new(1_000, 0));
        let turns = split_turns(&sent);
        assert_eq!(turns.len(), 2);
        assert!(turns[0][0].text().starts_with(SUMMARY_PREFIX));
        assert_eq!(turns[1][0].text(), "task 7");
    }

    #[test]
    fn send_compaction_masks_old_results() {
        let session = session_with_turns(4, "long output");
        let c = compactor(Arc::new(FixedSummarizer::ok("s")));
        let sent = c.compact_for_send(&session, &TokenBudget::new(200_000, 0));
        let Content::ToolResult { content, .. } = &sent[2].content[0] else {
            panic!("expected tool result");
        };
        assert!(content.starts_with("[output omitted:"));
        let Content::ToolResult { content, .. } = &sent[14].content[0] else {
            panic!("expected tool result");
        };
        assert_eq!(content, "long output");
    }

    #[tokio::test]
    async fn full_compaction_keeps_last_turns_and_summary() {
        let summarizer = Arc::new(FixedSummarizer::ok("new summary"));
        let c = compactor(summarizer.clone());
        let mut session = session_with_turns(6, "ok");
        session.summary = "old summary".into();
        session.gentle_masked = true;

        let dropped = c.full(&mut session, &CancellationToken::new()).await.unwrap();

        assert_eq!(dropped, Some(12));
        assert_eq!(session.messages.len(), 12);
        assert_eq!(session.messages[0].text(), "task 3");
        assert_eq!(session.summary, "new summary");
        assert!(!session.gentle_masked);
        let seen = summarizer.seen.lock().unwrap();
        assert_eq!(seen[0], ("old summary".to_string(), 24));
    }

    #[tokio::test]
    async fn full_compaction_with_few_turns_is_a_no_op() {
        let summarizer = Arc::new(FixedSummarizer::ok("s"));
        let c = compactor(summarizer.clone());
        let mut session = session_with_turns(2, "ok");
        assert_eq!(c.full(&mut session, &CancellationToken::new()).await.unwrap(), None);
        assert_eq!(summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn gentle_stage_runs_once_per_cycle() {
        let c = compactor(Arc::new(FixedSummarizer::ok("s")));
        let mut session = session_with_turns(4, &"x".repeat(300));
        let budget = TokenBudget::new(1_000, 0);
        let used = c.usage(&session, &budget);
        assert!(used >= budget.gentle_threshold() && used < budget.compact_threshold());

        let first = c.auto_compact(&mut session, &budget, &CancellationToken::new()).await;
        assert_eq!(first, CompactionAction::Masked { results: 2 });
        assert!(session.gentle_masked);

        let second = c.auto_compact(&mut session, &budget, &CancellationToken::new()).await;
        assert_eq!(second, CompactionAction::None);
    }

    #[tokio::test]
    async fn failed_summary_leaves_history_alone() {
        let c = compactor(Arc::new(FixedSummarizer::failing()));
        let mut session = session_with_turns(6, &"x".repeat(1_000));
        let before = session.messages.clone();
        let action = c
            .auto_compact(&mut session, &TokenBudget::new(1_000, 0), &CancellationToken::new())
            .await;
        assert!(matches!(action, CompactionAction::Failed { .. }));
        assert_eq!(session.messages, before);
    }

    #[test]
    fn usage_takes_larger_of_reported_and_stored() {
        let c = compactor(Arc::new(FixedSummarizer::ok("s")));
        let mut session = session_with_turns(1, "ok");
        let usage = Usage {
            prompt_tokens: 5_000,
            completion_tokens: 10,
            total_tokens: 5_010,
        };
        session.record_usage(&usage, 3);
        let budget = TokenBudget::new(100_000, 50);
        let expected = 5_000 + estimate_messages_tokens(&session.messages[3..]);
        assert_eq!(c.usage(&session, &budget), expected);

        session.last_reported_prompt = None;
        let stored = 50 + estimate_messages_tokens(&session.messages);
        assert_eq!(c.usage(&session, &budget), stored);

        // A tiny reported prompt never undercuts the stored history
        let tiny = Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        };
        session.record_usage(&tiny, session.messages.len());
        assert_eq!(c.usage(&session, &budget), stored);
    }

    #[tokio::test]
    async fn trimmed_sends_still_trigger_full_compaction() {
        let summarizer = Arc::new(FixedSummarizer::ok("rolled up"));
        let c = compactor(summarizer.clone());
        let mut session = session_with_turns(40, &"x".repeat(800));
        let budget = TokenBudget::new(4_000, 0);

        // The provider reports the size of the trimmed request it received
        let sent = c.compact_for_send(&session, &budget);
        let reported = estimate_messages_tokens(&sent) as u32;
        assert!((reported as usize) < budget.compact_threshold());
        let count = session.messages.len();
        session.record_usage(
            &Usage {
                prompt_tokens: reported,
                completion_tokens: 5,
                total_tokens: reported + 5,
            },
            count,
        );
        assert!(c.usage(&session, &budget) >= budget.compact_threshold());

        let action = c.auto_compact(&mut session, &budget, &CancellationToken::new()).await;

        assert_eq!(action, CompactionAction::Summarized { dropped_messages: 148 });
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(session.summary, "rolled up");
        assert_eq!(split_turns(&session.messages).len(), 3);
        assert!(session.last_reported_prompt.is_none());
    }
}
