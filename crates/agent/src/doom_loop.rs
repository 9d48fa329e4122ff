//! Doom-loop detection: the model issuing the same tool calls over and over.
//!
//! Calls are compared by content (tool name and full input), not by id,
//! since vendors mint a fresh id for every call.

use codeloop_core::tool::ToolCallRequest;

/// Streak at which a corrective hint is injected.
pub const WARN_STREAK: u32 = 3;
/// Streak at which the turn is stopped.
pub const STOP_STREAK: u32 = 5;

pub const WARN_HINT: &str = "You have issued the same tool calls with identical arguments \
several times in a row and the results will not change. Stop repeating them: try a \
different approach, or explain to the user what is blocking you.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoomAction {
    None,
    Warn,
    Stop,
}

#[derive(Debug, Default)]
pub struct DoomLoopDetector {
    last: Option<String>,
    streak: u32,
}

/// Canonical text of a call set. `serde_json` objects keep keys sorted, so
/// inputs that differ only in key order compare equal.
fn signature(calls: &[ToolCallRequest]) -> String {
    let parts: Vec<(&str, &serde_json::Value)> =
        calls.iter().map(|c| (c.name.as_str(), &c.input)).collect();
    serde_json::to_string(&parts).unwrap_or_default()
}

impl DoomLoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.streak = 0;
    }

    /// Record the latest call set and say what to do about it.
    pub fn check(&mut self, calls: &[ToolCallRequest]) -> DoomAction {
        if calls.is_empty() {
            self.reset();
            return DoomAction::None;
        }

        let sig = signature(calls);
        if self.last.as_deref() == Some(sig.as_str()) {
            self.streak += 1;
        } else {
            self.last = Some(sig);
            self.streak = 1;
        }

        match self.streak {
            s if s >= STOP_STREAK => DoomAction::Stop,
            WARN_STREAK => DoomAction::Warn,
            _ => DoomAction::None,
        }
    }
}
