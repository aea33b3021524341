//! Remote tools exposed through the registry
//!
//! Integrates tools discovered over an [`RpcSession`] with the local tool
//! system. Full names follow `mcp__<server>__<tool>`.

use super::protocol::RemoteToolSpec;
use super::session::RpcSession;
use crate::tools::{ExecutionClass, Tool, ToolContext, ToolKind, ToolOutput};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

const NAME_PREFIX: &str = "mcp__";

/// Registry name for a remote tool
pub fn remote_tool_name(server: &str, tool: &str) -> String {
    format!("{}{}__{}", NAME_PREFIX, server, tool)
}

/// Registry prefix shared by every tool of one server
pub fn remote_tool_prefix(server: &str) -> String {
    format!("{}{}__", NAME_PREFIX, server)
}

/// Split a full name into `(server, tool)`
pub fn parse_remote_tool_name(full_name: &str) -> Option<(&str, &str)> {
    let rest = full_name.strip_prefix(NAME_PREFIX)?;
    let (server, tool) = rest.split_once("__")?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Remote tool wrapper that implements the Tool trait
pub struct RemoteTool {
    full_name: String,
    spec: RemoteToolSpec,
    session: Arc<RpcSession>,
}

impl RemoteTool {
    pub fn new(spec: RemoteToolSpec, session: Arc<RpcSession>) -> Self {
        Self {
            full_name: remote_tool_name(session.name(), &spec.name),
            spec,
            session,
        }
    }

    pub fn server_name(&self) -> &str {
        self.session.name()
    }

    /// Name the server knows the tool by
    pub fn remote_name(&self) -> &str {
        &self.spec.name
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        self.spec.description.as_deref().unwrap_or("Remote tool")
    }

    fn parameters(&self) -> serde_json::Value {
        self.spec.input_schema.clone()
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Rpc
    }

    /// Tools the server marks read-only may run alongside each other
    fn class(&self) -> ExecutionClass {
        if self.spec.is_read_only() {
            ExecutionClass::Concurrent
        } else {
            ExecutionClass::Sequential
        }
    }

    /// Runs to completion even if the turn is cancelled meanwhile; the
    /// remote side may already have acted.
    async fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        match self.session.invoke(&self.spec.name, args.clone()).await {
            Ok(text) => Ok(ToolOutput::success(text)),
            Err(e) => Ok(ToolOutput::error(e.to_string())),
        }
    }
}

/// Create tool wrappers for everything a session advertised
pub fn create_remote_tools(
    specs: Vec<RemoteToolSpec>,
    session: &Arc<RpcSession>,
) -> Vec<Arc<dyn Tool>> {
    specs
        .into_iter()
        .map(|spec| Arc::new(RemoteTool::new(spec, session.clone())) as Arc<dyn Tool>)
        .collect()
}
