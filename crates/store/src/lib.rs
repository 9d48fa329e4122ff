//! Session persistence backends for codeloop.
//!
//! - `file`: one JSON document per session under `~/.codeloop/sessions`
//! - `memory`: process-local map (tests, ephemeral runs)

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;
