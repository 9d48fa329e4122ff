//! Tool execution for codeloop.
//!
//! [`ToolExecutor`] gates every model-requested call through the permission
//! policy, a confirmer, a timeout and an output cap. The reference tools
//! give the agent the ability to run shell commands and read and write
//! files; anything else implementing `codeloop_core::Tool` can be
//! registered alongside them.

pub mod executor;
pub mod file_read;
pub mod file_write;
pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;

use codeloop_core::tool::ToolRegistry;

pub use executor::{ToolExecutor, truncate_output};
pub use file_read::ReadFileTool;
pub use file_write::WriteFileTool;
pub use shell::BashTool;

/// Create a registry with the built-in tools.
///
/// Shell commands run in `workspace` when given.
pub fn default_registry(workspace: Option<PathBuf>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let bash = match workspace {
        Some(dir) => BashTool::in_dir(dir),
        None => BashTool::new(),
    };
    registry.register(Arc::new(bash));
    registry.register(Arc::new(ReadFileTool::new()));
    registry.register(Arc::new(WriteFileTool::new()));
    registry
}
