//! Observation masking.
//!
//! Old tool results are the bulk of a coding session's history and are
//! rarely needed verbatim once the model has acted on them. Masking
//! replaces their content with a placeholder that records how much was
//! dropped, leaving the `tool_use`/`tool_result` pairing intact.
//!
//! The mask set is computed in one pass over the history (which results
//! are old enough, which are exempt) and applied in a second pass.

use std::collections::{HashMap, HashSet};

use codeloop_config::CompactionConfig;
use codeloop_core::message::{Content, Message};

const PLACEHOLDER_PREFIX: &str = "[output omitted:";

/// Placeholder text for a masked result of `bytes` bytes.
pub fn placeholder(bytes: usize) -> String {
    format!("{PLACEHOLDER_PREFIX} {bytes} bytes]")
}

fn is_masked(content: &str) -> bool {
    content.starts_with(PLACEHOLDER_PREFIX)
}

/// Which tool results may be masked.
#[derive(Debug, Clone)]
pub struct MaskPolicy {
    /// Most recent results that are always kept verbatim
    pub keep_recent: usize,
    pub protect_high_importance: bool,
    pub high_importance: HashSet<String>,
    /// Always eligible, even when the tool is also listed as high importance
    pub low_importance: HashSet<String>,
}

impl Default for MaskPolicy {
    fn default() -> Self {
        Self::from_config(&CompactionConfig::default())
    }
}

impl MaskPolicy {
    pub fn from_config(config: &CompactionConfig) -> Self {
        Self {
            keep_recent: config.keep_recent_results,
            protect_high_importance: config.protect_high_importance,
            high_importance: config.high_importance_tools.iter().cloned().collect(),
            low_importance: config.low_importance_tools.iter().cloned().collect(),
        }
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    fn is_protected(&self, tool: Option<&str>) -> bool {
        let Some(tool) = tool else {
            return false;
        };
        if self.low_importance.contains(tool) {
            return false;
        }
        self.protect_high_importance && self.high_importance.contains(tool)
    }

    /// Mask eligible results in place. Returns how many blocks changed.
    pub fn apply(&self, messages: &mut [Message]) -> usize {
        let names: HashMap<String, String> = messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|c| match c {
                Content::ToolUse { id, name, .. } => Some((id.clone(), name.clone())),
                _ => None,
            })
            .collect();

        let positions: Vec<(usize, usize)> = messages
            .iter()
            .enumerate()
            .flat_map(|(mi, m)| {
                m.content
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| matches!(c, Content::ToolResult { .. }))
                    .map(move |(bi, _)| (mi, bi))
            })
            .collect();

        let old = positions.len().saturating_sub(self.keep_recent);
        let targets: Vec<(usize, usize)> = positions[..old]
            .iter()
            .copied()
            .filter(|&(mi, bi)| match &messages[mi].content[bi] {
                Content::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    !is_error
                        && !is_masked(content)
                        && !self.is_protected(names.get(tool_use_id).map(String::as_str))
                }
                _ => false,
            })
            .collect();

        for &(mi, bi) in &targets {
            if let Content::ToolResult { content, .. } = &mut messages[mi].content[bi] {
                *content = placeholder(content.len());
            }
        }
        targets.len()
    }

    /// Masked copy of `messages`; the input is left untouched.
    pub fn masked(&self, messages: &[Message]) -> Vec<Message> {
        let mut copy = messages.to_vec();
        self.apply(&mut copy);
        copy
    }
}
