//! Security module for codeloop: the permission policy guarding tool calls.
//!
//! Provides:
//! - **Policy**: prioritized Allow / Deny / NeedConfirmation decision
//! - **Path checks**: lexical cleaning and allow-glob matching for write tools
//! - **Command checks**: deny-list, allow-prefix and injection detection
//! - **Approval memory**: session-scoped record of human confirmations

pub mod approval;
pub mod command;
pub mod path;
pub mod policy;

pub use approval::ApprovalMemory;
pub use path::{PathAllowList, clean};
pub use policy::{PermissionDecision, PermissionPolicy};
