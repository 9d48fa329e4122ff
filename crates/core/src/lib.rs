//! # codeloop core
//!
//! Domain types, traits, and error definitions for the codeloop coding-agent
//! runtime. Every other crate depends inward on this one.
//!
//! Every external collaborator is a trait here: [`Provider`] for LLM vendors,
//! [`Tool`] for capabilities, [`Store`] for persistence and [`Confirmer`] for
//! human approval. Implementations live in their respective crates, so tests
//! can swap in scripted stand-ins.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{AgentEvent, ConfirmationRequest, Confirmer, EventBus, StaticConfirmer};
pub use message::{Content, Message, Role};
pub use provider::{ChatRequest, EventStream, Provider, ProviderEvent, ToolDefinition, Usage};
pub use session::{Session, SessionId, SessionSummary, TokenCounters};
pub use store::Store;
pub use tool::{PermissionLevel, Tool, ToolCallRequest, ToolOutput, ToolRegistry};
