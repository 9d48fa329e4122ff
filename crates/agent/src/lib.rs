//! The codeloop agent loop.
//!
//! One user turn runs a **compact → request → stream → act** cycle:
//!
//! 1. **Compact** the stored history if usage crossed a threshold
//! 2. **Request** a reply from the provider with a send-time compacted copy
//! 3. **Stream** text to the event bus as it arrives
//! 4. **Act** on requested tool calls through the tool executor, then loop
//!
//! The loop ends when the model answers without tools, the user cancels,
//! the iteration limit is hit, or the doom-loop detector steps in.

pub mod context;
pub mod doom_loop;
pub mod loop_runner;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    CompactionAction, CompactionStage, Compactor, MaskPolicy, ProviderSummarizer, Summarizer,
    TokenBudget, split_turns,
};
pub use doom_loop::{DoomAction, DoomLoopDetector};
pub use loop_runner::{AgentLoop, DEFAULT_SYSTEM_PROMPT, TurnOutcome, TurnReport};
pub use retry::RetryPolicy;
