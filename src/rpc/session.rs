//! RPC session over a child process's stdio
//!
//! Requests are correlated with responses through a pending table keyed by a
//! monotonically increasing id, so responses may arrive in any order. When
//! the session is torn down, or the server's stdout closes, every request
//! still in the table is rejected with [`ShellError::SessionClosed`].

use super::protocol::{
    parse_incoming, CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, Incoming,
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, RemoteToolSpec, ServerInfo, PROTOCOL_VERSION,
};
use super::tools::create_remote_tools;
use super::RpcServerConfig;
use crate::error::{Result, ShellError};
use crate::tools::Tool;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Default)]
struct PendingState {
    requests: HashMap<u64, oneshot::Sender<Result<JsonRpcResponse>>>,
    closed: bool,
}

/// Correlation table for in-flight requests
#[derive(Clone, Default)]
struct PendingTable {
    inner: Arc<Mutex<PendingState>>,
}

impl PendingTable {
    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove `id` when the waiting side goes away, however it exits
    fn guard(&self, id: u64) -> PendingGuard<'_> {
        PendingGuard { table: self, id }
    }

    fn register(&self, id: u64) -> Result<oneshot::Receiver<Result<JsonRpcResponse>>> {
        let mut state = self.lock();
        if state.closed {
            return Err(ShellError::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.requests.insert(id, tx);
        Ok(rx)
    }

    fn remove(&self, id: u64) {
        self.lock().requests.remove(&id);
    }

    /// Resolve one entry. Returns false if nothing was waiting on `id`.
    fn resolve(&self, id: u64, response: Result<JsonRpcResponse>) -> bool {
        let sender = self.lock().requests.remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding request and refuse new ones
    fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.requests.drain().collect()
        };
        // Dropping the senders wakes each waiter with a closed channel
        drained.len()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn len(&self) -> usize {
        self.lock().requests.len()
    }
}

struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

/// A JSON-RPC client bound to one server process
pub struct RpcSession {
    name: String,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin_tx: mpsc::Sender<String>,
    pending: PendingTable,
    next_id: AtomicU64,
    initialized: AtomicBool,
    server_info: RwLock<Option<ServerInfo>>,
    tools: RwLock<Vec<RemoteToolSpec>>,
    request_timeout: Option<Duration>,
    tasks: Vec<JoinHandle<()>>,
}

impl RpcSession {
    /// Spawn the server process and start the reader and writer tasks
    pub async fn spawn(config: &RpcServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ShellError::Config(format!(
                "Failed to spawn RPC server '{}': {} {:?}: {}",
                config.name, config.command, config.args, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::Protocol("RPC server has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::Protocol("RPC server has no stdout".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(100);
        let pending = PendingTable::default();

        let server = config.name.clone();
        let writer = tokio::spawn(async move {
            let mut stdin_writer = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                if let Err(e) = stdin_writer.write_all(msg.as_bytes()).await {
                    tracing::error!(server = %server, "Failed to write to RPC stdin: {}", e);
                    break;
                }
                if let Err(e) = stdin_writer.flush().await {
                    tracing::error!(server = %server, "Failed to flush RPC stdin: {}", e);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let server = config.name.clone();
        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::debug!(server = %server, "RPC stdout closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match parse_incoming(trimmed) {
                            Ok(Incoming::Response(response)) => {
                                let id = response.id.unwrap_or_default();
                                if !reader_pending.resolve(id, Ok(response)) {
                                    tracing::debug!(server = %server, id, "Response for unknown request id");
                                }
                            }
                            Ok(Incoming::InvalidResponse { id, reason }) => {
                                tracing::warn!(server = %server, id, "Invalid RPC response: {}", reason);
                                let err = ShellError::Protocol(format!(
                                    "invalid response to request {}: {}",
                                    id, reason
                                ));
                                reader_pending.resolve(id, Err(err));
                            }
                            Ok(Incoming::Notification(value)) => {
                                tracing::debug!(
                                    server = %server,
                                    method = value.get("method").and_then(|m| m.as_str()).unwrap_or(""),
                                    "Ignoring RPC notification"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(server = %server, "Skipping malformed RPC line: {} ({})", trimmed, e);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(server = %server, "Failed to read RPC stdout: {}", e);
                        break;
                    }
                }
            }
            let rejected = reader_pending.close();
            if rejected > 0 {
                tracing::warn!(server = %server, rejected, "RPC server exited with requests outstanding");
            }
        });

        tracing::info!(
            server = %config.name,
            command = %config.command,
            pid = child.id().unwrap_or_default(),
            "RPC server spawned"
        );

        Ok(Self {
            name: config.name.clone(),
            child: tokio::sync::Mutex::new(Some(child)),
            stdin_tx,
            pending,
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            server_info: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
            tasks: vec![writer, reader],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get next request ID
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and wait for its response's `result`
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id();
        let rx = self.pending.register(id)?;
        let _entry = self.pending.guard(id);

        let msg = serde_json::to_string(&JsonRpcRequest::new(id, method, params))? + "\n";
        if self.stdin_tx.send(msg).await.is_err() {
            return Err(ShellError::SessionClosed);
        }
        tracing::debug!(server = %self.name, id, method, "RPC request sent");

        let received = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(ShellError::Timeout(format!(
                        "RPC '{}' on '{}' after {}s",
                        method,
                        self.name,
                        limit.as_secs()
                    )));
                }
            },
            None => rx.await,
        };
        let response = received.map_err(|_| ShellError::SessionClosed)??;

        if let Some(error) = response.error {
            return Err(ShellError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        if self.pending.is_closed() {
            return Err(ShellError::SessionClosed);
        }
        let msg = serde_json::to_string(&JsonRpcNotification::new(method, params))? + "\n";
        self.stdin_tx
            .send(msg)
            .await
            .map_err(|_| ShellError::SessionClosed)
    }

    /// Handshake: `initialize`, then the `notifications/initialized` notification
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "a3s-shell".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let value = self
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        self.notify("notifications/initialized", None).await?;
        self.initialized.store(true, Ordering::SeqCst);
        *self.server_info.write().unwrap_or_else(|e| e.into_inner()) =
            Some(result.server_info.clone());

        tracing::info!(
            "RPC session '{}' initialized with server '{}' v{}",
            self.name,
            result.server_info.name,
            result.server_info.version
        );
        Ok(result)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ShellError::NotInitialized(self.name.clone()))
        }
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Discover the server's tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let value = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(value)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        *self.tools.write().unwrap_or_else(|e| e.into_inner()) = tools.clone();
        Ok(tools)
    }

    /// Tools from the last `list_tools`
    pub fn cached_tools(&self) -> Vec<RemoteToolSpec> {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Registry wrappers for the last `list_tools`, named `mcp__<session>__<tool>`
    pub fn remote_tools(self: &Arc<Self>) -> Vec<Arc<dyn Tool>> {
        create_remote_tools(self.cached_tools(), self)
    }

    /// Call a remote tool and flatten its text content
    pub async fn invoke(&self, name: &str, arguments: serde_json::Value) -> Result<String> {
        self.ensure_initialized()?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let value = self
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        let result: CallToolResult = serde_json::from_value(value)?;

        let text = result.text();
        if result.is_error {
            return Err(ShellError::RemoteTool(text));
        }
        Ok(text)
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_connected(&self) -> bool {
        !self.pending.is_closed()
    }

    /// Kill the server and reject every outstanding request
    pub async fn disconnect(&self) {
        let rejected = self.pending.close();
        self.initialized.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        tracing::info!(server = %self.name, rejected, "RPC session disconnected");
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.pending.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> RpcServerConfig {
        RpcServerConfig {
            name: "test".into(),
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_spawn_invalid_command() {
        let result = RpcSession::spawn(&config("nonexistent_command_12345", &[])).await;
        assert!(matches!(result, Err(ShellError::Config(_))));
    }

    #[test]
    fn test_pending_table_close_rejects() {
        let table = PendingTable::default();
        let mut rx = table.register(1).unwrap();
        assert_eq!(table.close(), 1);
        assert!(rx.try_recv().is_err());
        assert!(matches!(table.register(2), Err(ShellError::SessionClosed)));
    }

    #[test]
    fn test_pending_table_resolve_once() {
        let table = PendingTable::default();
        let mut rx = table.register(3).unwrap();
        let response = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(3),
            result: Some(serde_json::json!({"ok": true})),
            error: None,
        };
        assert!(table.resolve(3, Ok(response.clone())));
        assert!(!table.resolve(3, Ok(response)));
        assert_eq!(rx.try_recv().unwrap().unwrap().result.unwrap()["ok"], true);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_pending_guard_removes_entry() {
        let table = PendingTable::default();
        let _rx = table.register(4).unwrap();
        {
            let _entry = table.guard(4);
            assert_eq!(table.len(), 1);
        }
        assert_eq!(table.len(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_tools_before_initialize() {
        let session = RpcSession::spawn(&config("cat", &[])).await.unwrap();
        assert!(matches!(
            session.list_tools().await,
            Err(ShellError::NotInitialized(_))
        ));
        assert!(matches!(
            session.invoke("x", serde_json::json!({})).await,
            Err(ShellError::NotInitialized(_))
        ));
        session.disconnect().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_after_disconnect() {
        let session = RpcSession::spawn(&config("cat", &[])).await.unwrap();
        session.disconnect().await;
        assert!(!session.is_connected());
        assert!(matches!(
            session.request("ping", None).await,
            Err(ShellError::SessionClosed)
        ));
        assert!(matches!(
            session.notify("ping", None).await,
            Err(ShellError::SessionClosed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disconnect_rejects_pending() {
        // `sleep` never answers
        let session = Arc::new(RpcSession::spawn(&config("sleep", &["30"])).await.unwrap());
        let s = session.clone();
        let waiting = tokio::spawn(async move { s.request("initialize", None).await });

        while session.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        session.disconnect().await;

        assert!(matches!(waiting.await.unwrap(), Err(ShellError::SessionClosed)));
    }
}
