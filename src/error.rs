//! Error types for a3s-shell

use thiserror::Error;

/// Errors that can occur in the shell runtime
#[derive(Debug, Error)]
pub enum ShellError {
    /// The model adapter failed; aborts the current turn
    #[error("Model adapter error: {0}")]
    Adapter(String),

    /// No registry entry under this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments were not valid JSON
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A command is already running in the shell session
    #[error("Command session is busy")]
    SessionBusy,

    /// The shell process exited before the command completed
    #[error("Command session terminated")]
    SessionTerminated,

    /// The RPC session was torn down while a request was outstanding
    #[error("RPC session closed")]
    SessionClosed,

    /// Discovery or invocation before the handshake completed
    #[error("RPC session '{0}' is not initialized")]
    NotInitialized(String),

    /// JSON-RPC error object returned by the remote side
    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Remote tool reported `isError`
    #[error("Remote tool error: {0}")]
    RemoteTool(String),

    /// Malformed or unexpected protocol message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Too many model round-trips in one turn
    #[error("Max tool rounds ({0}) exceeded")]
    MaxToolRounds(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure (process spawn, pipes, files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for shell operations
pub type Result<T> = std::result::Result<T, ShellError>;
