//! Context budget and compaction.
//!
//! Keeps an unbounded conversation inside a fixed context window.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`token`] | ~4 chars/token estimates, used when no exact count is known |
//! | [`budget`] | history/gentle/full thresholds derived from the window |
//! | [`turns`] | segmentation that never splits a `tool_use`/`tool_result` pair |
//! | [`mask`] | replaces old tool output with a size placeholder |
//! | [`summarizer`] | folds discarded history into the rolling summary |
//! | [`compactor`] | runs the stages and builds the history for each request |

pub mod budget;
pub mod compactor;
pub mod mask;
pub mod summarizer;
pub mod token;
pub mod turns;

pub use budget::{CompactionStage, TokenBudget};
pub use compactor::{CompactionAction, Compactor};
pub use mask::MaskPolicy;
pub use summarizer::{ProviderSummarizer, Summarizer, render_transcript};
pub use turns::split_turns;
