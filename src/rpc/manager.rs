//! RPC server manager
//!
//! Owns the live sessions and keeps the tool registry in step with them:
//! connecting a server registers its tools, disconnecting removes them.

use super::session::RpcSession;
use super::tools::remote_tool_prefix;
use super::RpcServerConfig;
use crate::error::{Result, ShellError};
use crate::tools::ToolRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// RPC server status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcServerStatus {
    pub name: String,
    pub connected: bool,
    pub tool_count: usize,
}

pub struct RpcManager {
    sessions: RwLock<HashMap<String, Arc<RpcSession>>>,
    registry: Arc<ToolRegistry>,
}

impl RpcManager {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Spawn, handshake and register tools. Returns the number of tools registered.
    pub async fn connect(&self, config: &RpcServerConfig) -> Result<usize> {
        if !config.enabled {
            return Err(ShellError::Config(format!(
                "RPC server is disabled: {}",
                config.name
            )));
        }
        if self.sessions.read().await.contains_key(&config.name) {
            self.disconnect(&config.name).await;
        }

        let session = Arc::new(RpcSession::spawn(config).await?);
        let handshake = async {
            session.initialize().await?;
            session.list_tools().await
        };
        if let Err(e) = handshake.await {
            session.disconnect().await;
            return Err(e);
        }

        let mut registered = 0;
        for tool in session.remote_tools() {
            let name = tool.name().to_string();
            if self.registry.register(tool) {
                registered += 1;
            } else {
                tracing::warn!(server = %config.name, tool = %name, "Skipping remote tool that collides with an existing name");
            }
        }

        self.sessions
            .write()
            .await
            .insert(config.name.clone(), session);
        tracing::info!(server = %config.name, tools = registered, "RPC server connected");
        Ok(registered)
    }

    /// Tear down one session and drop its tools. Returns false if it was unknown.
    pub async fn disconnect(&self, name: &str) -> bool {
        let session = self.sessions.write().await.remove(name);
        match session {
            Some(session) => {
                let removed = self.registry.unregister_prefix(&remote_tool_prefix(name));
                session.disconnect().await;
                tracing::info!(server = %name, tools = removed, "RPC server disconnected");
                true
            }
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for name in names {
            self.disconnect(&name).await;
        }
    }

    pub async fn session(&self, name: &str) -> Option<Arc<RpcSession>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Status of every session, sorted by name
    pub async fn status(&self) -> Vec<RpcServerStatus> {
        let sessions = self.sessions.read().await;
        let mut status: Vec<_> = sessions
            .iter()
            .map(|(name, session)| RpcServerStatus {
                name: name.clone(),
                connected: session.is_connected(),
                tool_count: session.cached_tools().len(),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_disabled_server() {
        let manager = RpcManager::new(Arc::new(ToolRegistry::new()));
        let config = RpcServerConfig {
            name: "off".into(),
            command: "true".into(),
            enabled: false,
            ..Default::default()
        };
        assert!(matches!(
            manager.connect(&config).await,
            Err(ShellError::Config(_))
        ));
        assert!(manager.status().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown() {
        let manager = RpcManager::new(Arc::new(ToolRegistry::new()));
        assert!(!manager.disconnect("nope").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_failure_leaves_no_session() {
        let manager = RpcManager::new(Arc::new(ToolRegistry::new()));
        // Exits immediately, so the handshake sees the session close
        let config = RpcServerConfig {
            name: "gone".into(),
            command: "true".into(),
            ..Default::default()
        };
        assert!(matches!(
            manager.connect(&config).await,
            Err(ShellError::SessionClosed)
        ));
        assert!(manager.session("gone").await.is_none());
    }
}
