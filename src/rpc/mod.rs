//! JSON-RPC tool servers
//!
//! A server is a child process speaking newline-delimited JSON-RPC 2.0 on its
//! stdin/stdout. Its tools are registered under `mcp__<server>__<tool>`.

mod manager;
pub mod protocol;
mod session;
mod tools;

pub use manager::{RpcManager, RpcServerStatus};
pub use session::RpcSession;
pub use tools::{
    create_remote_tools, parse_remote_tool_name, remote_tool_name, remote_tool_prefix, RemoteTool,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How to launch one RPC server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-request deadline; none waits until the session closes
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            enabled: true,
            request_timeout_secs: None,
        }
    }
}
