//! git tools
//!
//! These spawn `git` directly rather than going through the command session,
//! so read-only git calls can run alongside each other.

use crate::tools::{
    optional_bool, optional_str, required_str, truncate_output, ExecutionClass, Tool, ToolContext,
    ToolKind, ToolOutput,
};
use anyhow::{Context, Result};
use async_trait::async_trait;

async fn run_git(ctx: &ToolContext, args: &[&str]) -> Result<ToolOutput> {
    tracing::debug!(args = ?args, "Running git");
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(&ctx.workspace)
        .kill_on_drop(true)
        .output()
        .await
        .context("Failed to run git")?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    let text = truncate_output(text.trim_end().to_string());

    if output.status.success() {
        Ok(ToolOutput::success(if text.is_empty() { "(no output)".to_string() } else { text }))
    } else {
        Ok(ToolOutput::error(text)
            .with_metadata(serde_json::json!({ "exitCode": output.status.code() })))
    }
}

pub struct GitStatusTool;

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the working tree status (short format with branch)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Process
    }

    fn class(&self) -> ExecutionClass {
        ExecutionClass::Concurrent
    }

    async fn execute(&self, _args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        run_git(ctx, &["status", "--short", "--branch"]).await
    }
}

pub struct GitDiffTool;

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show unstaged changes, or staged changes with staged=true. Optionally limited to one path."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "staged": {"type": "boolean"},
                "path": {"type": "string"}
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Process
    }

    fn class(&self) -> ExecutionClass {
        ExecutionClass::Concurrent
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let mut git_args = vec!["diff"];
        if optional_bool(args, "staged") {
            git_args.push("--staged");
        }
        if let Some(path) = optional_str(args, "path") {
            git_args.push("--");
            git_args.push(path);
        }
        run_git(ctx, &git_args).await
    }
}

pub struct GitCommitTool;

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Create a commit with the given message. Set all=true to stage tracked changes first."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "all": {"type": "boolean"}
            },
            "required": ["message"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Process
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let message = required_str(args, "message")?;
        if message.trim().is_empty() {
            return Ok(ToolOutput::error("Commit message must not be empty"));
        }
        let mut git_args = vec!["commit"];
        if optional_bool(args, "all") {
            git_args.push("-a");
        }
        git_args.push("-m");
        git_args.push(message);
        run_git(ctx, &git_args).await
    }
}
