//! bash tool backed by the persistent command session

use crate::shell::CommandSession;
use crate::tools::{
    optional_u64, required_str, truncate_output, Tool, ToolContext, ToolKind, ToolOutput,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default per-command deadline
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct BashTool {
    session: Arc<CommandSession>,
}

impl BashTool {
    pub fn new(session: Arc<CommandSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a command in a persistent shell. The working directory and environment carry over between calls."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Command line to run"},
                "timeout_secs": {"type": "integer", "description": "Deadline in seconds (default: 120)"}
            },
            "required": ["command"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Process
    }

    async fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let command = required_str(args, "command")?;
        let timeout = Duration::from_secs(optional_u64(args, "timeout_secs").unwrap_or(DEFAULT_TIMEOUT_SECS));

        let result = match self.session.execute_with_status(command, Some(timeout)).await {
            Ok(result) => result,
            Err(e) => return Ok(ToolOutput::error(e.to_string())),
        };

        let mut content = result.output;
        match result.exit_code {
            Some(0) | None => Ok(ToolOutput::success(truncate_output(content))),
            Some(code) => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&format!("[exit code: {}]", code));
                Ok(ToolOutput::error(truncate_output(content))
                    .with_metadata(serde_json::json!({ "exitCode": code })))
            }
        }
    }
}
