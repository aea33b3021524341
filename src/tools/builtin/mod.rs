//! Builtin tools

mod bash;
mod fetch;
mod file;
mod git;

pub use bash::BashTool;
pub use fetch::FetchUrlTool;
pub use file::{EditFileTool, ListFilesTool, ReadFileTool, SearchFilesTool, WriteFileTool};
pub use git::{GitCommitTool, GitDiffTool, GitStatusTool};

use super::ToolRegistry;
use crate::shell::CommandSession;
use std::sync::Arc;

/// Register every builtin. `bash` runs through the shared command session.
pub fn register_builtins(registry: &ToolRegistry, shell: Arc<CommandSession>) {
    registry.register_builtin(Arc::new(ReadFileTool));
    registry.register_builtin(Arc::new(ListFilesTool));
    registry.register_builtin(Arc::new(SearchFilesTool));
    registry.register_builtin(Arc::new(WriteFileTool));
    registry.register_builtin(Arc::new(EditFileTool));
    registry.register_builtin(Arc::new(BashTool::new(shell)));
    registry.register_builtin(Arc::new(GitStatusTool));
    registry.register_builtin(Arc::new(GitDiffTool));
    registry.register_builtin(Arc::new(GitCommitTool));
    registry.register_builtin(Arc::new(FetchUrlTool::new()));
}
