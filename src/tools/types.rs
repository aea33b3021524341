//! Core types for the tool system

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// What a tool touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    File,
    Process,
    Network,
    /// Proxy for a tool hosted by an RPC session
    Rpc,
}

/// How a call may be scheduled within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionClass {
    /// Side-effect free; may run alongside other concurrent calls
    Concurrent,
    /// Writes or interacts; runs one at a time in received order
    Sequential,
}

/// Tool execution context
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Workspace root directory
    pub workspace: PathBuf,
    /// Token of the turn this call belongs to
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(workspace: PathBuf) -> Self {
        // Canonicalize so prefix checks survive symlinked temp dirs
        let workspace = workspace.canonicalize().unwrap_or(workspace);
        Self {
            workspace,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve an existing path relative to the workspace
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        resolve_path(&self.workspace, path)
    }

    /// Resolve a path for writing (file may not exist yet)
    pub fn resolve_path_for_write(&self, path: &str) -> Result<PathBuf> {
        resolve_path_for_write(&self.workspace, path)
    }
}

fn resolve_path(workspace: &Path, path: &str) -> Result<PathBuf> {
    let canonical = workspace
        .join(path)
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Failed to resolve path '{}': {}", path, e))?;
    if !canonical.starts_with(workspace) {
        anyhow::bail!("Path escapes workspace: {}", path);
    }
    Ok(canonical)
}

fn resolve_path_for_write(workspace: &Path, path: &str) -> Result<PathBuf> {
    let resolved = workspace.join(path);
    let file_name = resolved
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))?
        .to_owned();
    let parent = resolved
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))?;

    // Walk up to the closest existing ancestor so new directories can be created
    let mut existing = parent.to_path_buf();
    let mut missing = Vec::new();
    while !existing.exists() {
        let name = existing
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))?
            .to_owned();
        missing.push(name);
        if !existing.pop() {
            anyhow::bail!("Invalid path: {}", path);
        }
    }

    let mut canonical = existing
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Failed to resolve parent of '{}': {}", path, e))?;
    if !canonical.starts_with(workspace) {
        anyhow::bail!("Path escapes workspace: {}", path);
    }
    for name in missing.into_iter().rev() {
        if name == ".." {
            anyhow::bail!("Path escapes workspace: {}", path);
        }
        canonical.push(name);
    }
    Ok(canonical.join(file_name))
}

/// Tool execution output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            success: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Tool trait - the core abstraction for everything the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique within registry)
    fn name(&self) -> &str;

    /// Human-readable description for the model
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters
    fn parameters(&self) -> serde_json::Value;

    fn kind(&self) -> ToolKind;

    /// Scheduling class, fixed per tool
    fn class(&self) -> ExecutionClass {
        ExecutionClass::Sequential
    }

    /// Whether a call must be approved before it runs
    fn requires_confirmation(&self) -> bool {
        self.class() == ExecutionClass::Sequential
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_context_resolve_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());
        std::fs::write(temp_dir.path().join("file.txt"), "test").unwrap();

        assert!(ctx.resolve_path("file.txt").is_ok());
        assert!(ctx.resolve_path("nonexistent.txt").is_err());
    }

    #[test]
    fn test_resolve_path_rejects_escape() {
        let temp_dir = tempfile::tempdir().unwrap();
        let inner = temp_dir.path().join("ws");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(temp_dir.path().join("secret"), "x").unwrap();
        let ctx = ToolContext::new(inner);

        let err = ctx.resolve_path("../secret").unwrap_err();
        assert!(err.to_string().contains("escapes workspace"));
        assert!(ctx.resolve_path_for_write("../other.txt").is_err());
    }

    #[test]
    fn test_resolve_path_for_write_creates_nested() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp_dir.path().to_path_buf());

        let path = ctx.resolve_path_for_write("a/b/new.txt").unwrap();
        assert!(path.starts_with(&ctx.workspace));
        assert!(path.ends_with("a/b/new.txt"));
    }

    #[test]
    fn test_tool_output() {
        let ok = ToolOutput::success("Hello");
        assert!(ok.success);
        assert_eq!(ok.content, "Hello");

        let err = ToolOutput::error("Failed").with_metadata(serde_json::json!({"code": 1}));
        assert!(!err.success);
        assert_eq!(err.metadata.unwrap()["code"], 1);
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(serde_json::to_value(ToolKind::Rpc).unwrap(), "rpc");
        assert_eq!(
            serde_json::to_value(ExecutionClass::Concurrent).unwrap(),
            "concurrent"
        );
    }
}
