//! Tool System
//!
//! Every capability the model can call is a [`Tool`] registered in a
//! [`ToolRegistry`]. Each tool declares what it touches ([`ToolKind`]) and
//! how it may be scheduled ([`ExecutionClass`]).
//!
//! ## Architecture
//!
//! ```text
//! ToolRegistry
//!   ├── builtin tools
//!   │     ├── file:    read_file, list_files, search_files, write_file, edit_file
//!   │     ├── process: bash (persistent CommandSession), git_status, git_diff, git_commit
//!   │     └── network: fetch_url
//!   └── dynamic tools
//!         └── RemoteTool (mcp__<server>__<tool>, proxied over an RpcSession)
//! ```

pub mod builtin;
mod registry;
mod types;

pub use builtin::register_builtins;
pub use registry::ToolRegistry;
pub use types::{ExecutionClass, Tool, ToolContext, ToolKind, ToolOutput};

/// Maximum output size in bytes before truncation
pub const MAX_OUTPUT_SIZE: usize = 100 * 1024; // 100KB

/// Maximum lines to read from a file
pub const MAX_READ_LINES: usize = 2000;

/// Maximum line length before truncation
pub const MAX_LINE_LENGTH: usize = 2000;

/// Cut `text` to at most `MAX_OUTPUT_SIZE` bytes on a char boundary
pub fn truncate_output(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_SIZE {
        return text;
    }
    let mut end = MAX_OUTPUT_SIZE;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let total = text.len();
    text.truncate(end);
    text.push_str(&format!("\n... [truncated {} of {} bytes]", total - end, total));
    text
}

/// Fetch a required string argument
pub(crate) fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing required string parameter '{}'", key))
}

pub(crate) fn optional_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub(crate) fn optional_bool(args: &serde_json::Value, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub(crate) fn optional_u64(args: &serde_json::Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output_short() {
        assert_eq!(truncate_output("abc".into()), "abc");
    }

    #[test]
    fn test_truncate_output_long_multibyte() {
        let text = "é".repeat(MAX_OUTPUT_SIZE);
        let out = truncate_output(text);
        assert!(out.contains("[truncated"));
        assert!(out.len() < MAX_OUTPUT_SIZE + 100);
    }

    #[test]
    fn test_arg_helpers() {
        let args = serde_json::json!({"path": "a", "all": true, "n": 3});
        assert_eq!(required_str(&args, "path").unwrap(), "a");
        assert!(required_str(&args, "missing").is_err());
        assert!(optional_bool(&args, "all"));
        assert!(!optional_bool(&args, "nope"));
        assert_eq!(optional_u64(&args, "n"), Some(3));
        assert_eq!(optional_str(&args, "n"), None);
    }
}
