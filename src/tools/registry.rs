//! Tool Registry
//!
//! Name to capability map for builtin and dynamically discovered tools.
//! The registry is an explicit value handed to the agent loop; nothing in the
//! crate reaches for a global instance.

use super::types::{Tool, ToolContext, ToolOutput};
use crate::error::{Result, ShellError};
use crate::llm::ToolDefinition;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::Instrument;

/// Tool registry for managing all available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Names of builtin tools that cannot be overridden
    builtins: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_tools(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tools(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a builtin tool (cannot be overridden by dynamic tools)
    pub fn register_builtin(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!("Registering builtin tool: {}", name);
        self.write_tools().insert(name.clone(), tool);
        self.builtins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name);
    }

    /// Register a dynamic tool.
    ///
    /// Returns false when the name belongs to a builtin; the registration is
    /// rejected rather than shadowing it.
    pub fn register(&self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.is_builtin(&name) {
            tracing::warn!("Rejected registration of tool '{}': cannot shadow builtin", name);
            return false;
        }
        tracing::debug!("Registering tool: {}", name);
        self.write_tools().insert(name, tool);
        true
    }

    /// Unregister a tool by name. Builtins stay.
    pub fn unregister(&self, name: &str) -> bool {
        if self.is_builtin(name) {
            return false;
        }
        tracing::debug!("Unregistering tool: {}", name);
        self.write_tools().remove(name).is_some()
    }

    /// Unregister every dynamic tool whose name starts with `prefix`
    pub fn unregister_prefix(&self, prefix: &str) -> usize {
        let builtins = self.builtins.read().unwrap_or_else(|e| e.into_inner());
        let mut tools = self.write_tools();
        let before = tools.len();
        tools.retain(|name, _| !name.starts_with(prefix) || builtins.contains(name));
        before - tools.len()
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read_tools().get(name).cloned()
    }

    /// Typed lookup: a missing entry is `ShellError::UnknownTool`
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| ShellError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_tools().contains_key(name)
    }

    /// Tool definitions for the model, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .read_tools()
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered tool names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_tools().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read_tools().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute a tool by name.
    ///
    /// Unknown tools and tool failures both come back as an error output so
    /// that the caller can always append a result for the call.
    pub async fn execute(
        &self,
        name: &str,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutput {
        let tool = match self.resolve(name) {
            Ok(tool) => tool,
            Err(e) => return ToolOutput::error(e.to_string()),
        };

        let span = tracing::info_span!(
            "a3s.tool.execute",
            "a3s.tool.name" = %name,
            "a3s.tool.kind" = ?tool.kind(),
        );
        async {
            let start = std::time::Instant::now();
            let output = match tool.execute(args, ctx).await {
                Ok(output) => output,
                Err(e) => ToolOutput::error(format!("Tool '{}' failed: {:#}", name, e)),
            };
            tracing::info!(
                success = output.success,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tool finished"
            );
            output
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::{ExecutionClass, ToolKind};
    use async_trait::async_trait;

    struct MockTool {
        name: String,
        fail: bool,
    }

    impl MockTool {
        fn new(name: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                name: name.to_string(),
                fail: false,
            })
        }

        fn failing(name: &str) -> Arc<dyn Tool> {
            Arc::new(Self {
                name: name.to_string(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "A mock tool for testing"
        }

        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        fn kind(&self) -> ToolKind {
            ToolKind::File
        }

        fn class(&self) -> ExecutionClass {
            ExecutionClass::Concurrent
        }

        async fn execute(
            &self,
            _args: &serde_json::Value,
            _ctx: &ToolContext,
        ) -> anyhow::Result<ToolOutput> {
            if self.fail {
                anyhow::bail!("disk on fire");
            }
            Ok(ToolOutput::success("mock output"))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(std::env::temp_dir())
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = ToolRegistry::new();
        assert!(registry.register(MockTool::new("mock")));
        assert!(registry.contains("mock"));
        assert!(registry.get("mock").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_resolve_unknown_is_typed() {
        let registry = ToolRegistry::new();
        match registry.resolve("nope") {
            Err(ShellError::UnknownTool(name)) => assert_eq!(name, "nope"),
            other => panic!("expected UnknownTool, got {:?}", other.map(|t| t.name().to_string())),
        }
    }

    #[test]
    fn test_registry_builtin_cannot_be_shadowed() {
        let registry = ToolRegistry::new();
        registry.register_builtin(MockTool::new("read_file"));
        assert!(!registry.register(MockTool::new("read_file")));
        assert!(!registry.unregister("read_file"));
        assert!(registry.contains("read_file"));
    }

    #[test]
    fn test_registry_definitions_sorted() {
        let registry = ToolRegistry::new();
        registry.register(MockTool::new("zeta"));
        registry.register(MockTool::new("alpha"));
        registry.register(MockTool::new("mid"));
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_registry_unregister_prefix() {
        let registry = ToolRegistry::new();
        registry.register_builtin(MockTool::new("mcp__builtin"));
        registry.register(MockTool::new("mcp__fs__read"));
        registry.register(MockTool::new("mcp__fs__write"));
        registry.register(MockTool::new("mcp__git__log"));
        assert_eq!(registry.unregister_prefix("mcp__fs__"), 2);
        assert_eq!(registry.unregister_prefix("mcp__"), 1);
        assert_eq!(registry.list(), vec!["mcp__builtin"]);
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let registry = ToolRegistry::new();
        registry.register(MockTool::new("mock"));
        let output = registry.execute("mock", &serde_json::json!({}), &ctx()).await;
        assert!(output.success);
        assert_eq!(output.content, "mock output");
    }

    #[tokio::test]
    async fn test_registry_execute_unknown_and_failing() {
        let registry = ToolRegistry::new();
        registry.register(MockTool::failing("broken"));

        let output = registry.execute("missing", &serde_json::json!({}), &ctx()).await;
        assert!(!output.success);
        assert_eq!(output.content, "Unknown tool: missing");

        let output = registry.execute("broken", &serde_json::json!({}), &ctx()).await;
        assert!(!output.success);
        assert!(output.content.contains("disk on fire"));
    }
}
