//! # a3s-shell
//!
//! Agent runtime for an interactive coding-assistant shell.
//!
//! ## Overview
//!
//! `a3s-shell` lets a language model drive local development work through
//! tool calls: reading and editing files, running commands in a persistent
//! shell, git operations, and tools served by external JSON-RPC processes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_shell::{AgentBuilder, CancellationController, OpenAiClient, ToolRegistry, TurnInput};
//! use a3s_shell::shell::{CommandSession, ShellProgram};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_shell::Result<()> {
//! let workspace = std::env::current_dir()?;
//! let registry = Arc::new(ToolRegistry::new());
//! let shell = Arc::new(CommandSession::new(ShellProgram::default(), workspace.clone()));
//! a3s_shell::tools::register_builtins(&registry, shell);
//!
//! let llm = Arc::new(OpenAiClient::new("sk-...".into(), "gpt-4o".into()));
//! let mut agent = AgentBuilder::new()
//!     .llm_client(llm)
//!     .registry(registry)
//!     .workspace(workspace)
//!     .build()?;
//!
//! let controller = CancellationController::new();
//! let turn = controller.begin_turn().with_timeout(std::time::Duration::from_secs(600));
//! let outcome = agent.run_turn(TurnInput::new("List the files here"), turn.token()).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AgentLoop**: history, model calls, tool dispatch, confirmation,
//!   cancellation and compaction
//! - **ToolRegistry**: injected name → [`Tool`] map; builtins plus remote tools
//! - **CommandSession**: one long-lived shell process, sentinel-delimited output
//! - **RpcSession**: JSON-RPC client over a child process's stdio
//! - **CancellationController**: fresh token per turn and Ctrl-C routing
//! - **ConfirmationHandler**: human-in-the-loop approval of write-class calls

pub mod agent;
pub mod cancel;
pub mod config;
pub mod error;
pub mod hitl;
pub mod llm;
pub mod prompts;
pub mod rpc;
pub mod shell;
pub mod tools;

// Re-export core types
pub use agent::{
    compact_messages, AgentBuilder, AgentConfig, AgentEvent, AgentLoop, CompactionOutcome,
    ContextItem, Mode, TurnInput, TurnOutcome,
};
pub use cancel::{CancellationController, TurnCancellation};
pub use config::ShellConfig;
pub use error::{Result, ShellError};
pub use hitl::{
    AutoApprove, ConfirmationHandler, ConfirmationManager, ConfirmationPolicy,
    ConfirmationRequest, ConfirmationResponse, TimeoutAction,
};
pub use llm::{LlmClient, LlmResponse, Message, OpenAiClient, Role, ToolCall, ToolDefinition};
pub use rpc::{RpcManager, RpcServerConfig, RpcSession};
pub use shell::{CommandSession, ShellProgram};
pub use tools::{ExecutionClass, Tool, ToolContext, ToolKind, ToolOutput, ToolRegistry};
