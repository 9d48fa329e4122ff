//! Per-turn token budget derived from the model's context window.

/// Share of the window the history may occupy when sent.
const HISTORY_MAX_PERCENT: usize = 65;
/// Usage at which observation masking kicks in.
const GENTLE_PERCENT: usize = 70;
/// Usage at which the history is summarized and truncated.
const COMPACT_PERCENT: usize = 80;

/// Which compaction stage a given usage level calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStage {
    None,
    Gentle,
    Full,
}

/// Thresholds for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    context_window: usize,
    system_tokens: usize,
}

impl TokenBudget {
    /// `system_tokens` covers the system prompt and the tool schemas.
    pub fn new(context_window: u32, system_tokens: usize) -> Self {
        Self {
            context_window: context_window as usize,
            system_tokens,
        }
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn system_tokens(&self) -> usize {
        self.system_tokens
    }

    /// Tokens the history itself may use in an outgoing request.
    pub fn history_max(&self) -> usize {
        (self.context_window * HISTORY_MAX_PERCENT / 100).saturating_sub(self.system_tokens)
    }

    pub fn gentle_threshold(&self) -> usize {
        self.context_window * GENTLE_PERCENT / 100
    }

    pub fn compact_threshold(&self) -> usize {
        self.context_window * COMPACT_PERCENT / 100
    }

    /// Classify a total prompt size (system + history).
    pub fn stage(&self, used: usize) -> CompactionStage {
        if used >= self.compact_threshold() {
            CompactionStage::Full
        } else if used >= self.gentle_threshold() {
            CompactionStage::Gentle
        } else {
            CompactionStage::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_percentages_of_window() {
        let budget = TokenBudget::new(100_000, 5_000);
        assert_eq!(budget.history_max(), 60_000);
        assert_eq!(budget.gentle_threshold(), 70_000);
        assert_eq!(budget.compact_threshold(), 80_000);
    }

    #[test]
    fn huge_system_prompt_saturates() {
        let budget = TokenBudget::new(1_000, 5_000);
        assert_eq!(budget.history_max(), 0);
    }

    #[test]
    fn stage_classification() {
        let budget = TokenBudget::new(1_000, 0);
        assert_eq!(budget.stage(100), CompactionStage::None);
        assert_eq!(budget.stage(699), CompactionStage::None);
        assert_eq!(budget.stage(700), CompactionStage::Gentle);
        assert_eq!(budget.stage(800), CompactionStage::Full);
        assert_eq!(budget.stage(5_000), CompactionStage::Full);
    }
}
