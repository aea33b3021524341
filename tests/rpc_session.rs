//! Integration tests for the stdio JSON-RPC session
//!
//! The server is a small `sh` script that answers by method and tool name.
//!
//! Run with: `cargo test --test rpc_session`

#![cfg(unix)]

use a3s_shell::rpc::{RpcManager, RpcServerConfig, RpcSession};
use a3s_shell::tools::{ExecutionClass, Tool, ToolContext, ToolRegistry};
use tokio_util::sync::CancellationToken;
use a3s_shell::ShellError;
use std::sync::Arc;
use std::time::Duration;

const FAKE_SERVER: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"1.0"}}}\n' "$id"
      ;;
    *'"method":"notifications/initialized"'*)
      ;;
    *'"cursor":"page2"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"write","description":"Write something"}]}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      echo 'not json'
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"fast","description":"Fast","inputSchema":{"type":"object"},"annotations":{"readOnlyHint":true}},{"name":"slow"}],"nextCursor":"page2"}}\n' "$id"
      ;;
    *'"name":"slow"'*)
      (sleep 0.3; printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"slow done"}]}}\n' "$id") &
      ;;
    *'"name":"fast"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"fast done"}]}}\n' "$id"
      ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}\n' "$id"
      ;;
    *'"name":"badshape"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"message":"no code"}}\n' "$id"
      ;;
    *'"name":"hang"'*)
      ;;
    *'"name":"die"'*)
      exit 0
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id"
      ;;
  esac
done
"##;

fn fake_config(timeout: Option<u64>) -> RpcServerConfig {
    RpcServerConfig {
        name: "fake".to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), FAKE_SERVER.to_string()],
        request_timeout_secs: timeout,
        ..Default::default()
    }
}

async fn connected(timeout: Option<u64>) -> Arc<RpcSession> {
    let session = Arc::new(RpcSession::spawn(&fake_config(timeout)).await.unwrap());
    session.initialize().await.unwrap();
    session
}

#[tokio::test]
async fn test_handshake_and_paginated_discovery() {
    let session = Arc::new(RpcSession::spawn(&fake_config(None)).await.unwrap());
    assert!(!session.is_initialized());

    let init = session.initialize().await.unwrap();
    assert_eq!(init.server_info.name, "fake");
    assert_eq!(init.protocol_version, "2024-11-05");
    assert!(session.is_initialized());
    assert_eq!(session.server_info().unwrap().version, "1.0");

    // The malformed line and the notification before the response are skipped
    let tools = session.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["fast", "slow", "write"]);
    assert!(tools[0].is_read_only());

    let wrapped = session.remote_tools();
    assert_eq!(wrapped[0].name(), "mcp__fake__fast");
    assert_eq!(wrapped[0].class(), ExecutionClass::Concurrent);
    assert_eq!(wrapped[2].name(), "mcp__fake__write");
    assert_eq!(wrapped[2].class(), ExecutionClass::Sequential);

    session.disconnect().await;
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated() {
    let session = connected(None).await;

    let slow = {
        let session = session.clone();
        tokio::spawn(async move { session.invoke("slow", serde_json::json!({})).await })
    };
    while session.pending_count() == 0 {
        tokio::task::yield_now().await;
    }

    let fast = session.invoke("fast", serde_json::json!({})).await.unwrap();
    assert_eq!(fast, "fast done");
    assert!(!slow.is_finished());

    assert_eq!(slow.await.unwrap().unwrap(), "slow done");
    assert_eq!(session.pending_count(), 0);
    session.disconnect().await;
}

#[tokio::test]
async fn test_is_error_result() {
    let session = connected(None).await;
    match session.invoke("fail", serde_json::json!({})).await {
        Err(ShellError::RemoteTool(text)) => assert_eq!(text, "boom"),
        other => panic!("expected RemoteTool error, got {:?}", other),
    }
    session.disconnect().await;
}

#[tokio::test]
async fn test_json_rpc_error() {
    let session = connected(None).await;
    match session.request("resources/list", None).await {
        Err(ShellError::Rpc { code, message }) => {
            assert_eq!(code, -32601);
            assert_eq!(message, "Method not found");
        }
        other => panic!("expected Rpc error, got {:?}", other),
    }
    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_rejects_pending_request() {
    let session = connected(None).await;

    let hanging = {
        let session = session.clone();
        tokio::spawn(async move { session.invoke("hang", serde_json::json!({})).await })
    };
    while session.pending_count() == 0 {
        tokio::task::yield_now().await;
    }

    session.disconnect().await;
    let result = tokio::time::timeout(Duration::from_secs(5), hanging)
        .await
        .expect("pending request must not hang")
        .unwrap();
    assert!(matches!(result, Err(ShellError::SessionClosed)));
    assert!(!session.is_connected());
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_process_exit_rejects_pending_requests() {
    let session = connected(None).await;

    let hanging = {
        let session = session.clone();
        tokio::spawn(async move { session.invoke("hang", serde_json::json!({})).await })
    };
    while session.pending_count() == 0 {
        tokio::task::yield_now().await;
    }

    let died = session.invoke("die", serde_json::json!({})).await;
    assert!(matches!(died, Err(ShellError::SessionClosed)));

    let result = tokio::time::timeout(Duration::from_secs(5), hanging)
        .await
        .expect("pending request must not hang")
        .unwrap();
    assert!(matches!(result, Err(ShellError::SessionClosed)));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_request_timeout_removes_entry() {
    let session = connected(Some(1)).await;
    let result = session.invoke("hang", serde_json::json!({})).await;
    assert!(matches!(result, Err(ShellError::Timeout(_))));
    assert_eq!(session.pending_count(), 0);

    // The session keeps working after a timeout
    assert_eq!(
        session.invoke("fast", serde_json::json!({})).await.unwrap(),
        "fast done"
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_dropped_request_leaves_no_pending_entry() {
    let session = connected(None).await;
    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        session.invoke("hang", serde_json::json!({})),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(session.pending_count(), 0);
    session.disconnect().await;
}

#[tokio::test]
async fn test_unusable_response_rejects_its_request() {
    let session = connected(None).await;
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.invoke("badshape", serde_json::json!({})),
    )
    .await
    .expect("request must be rejected, not left waiting");
    assert!(matches!(result, Err(ShellError::Protocol(_))), "got {:?}", result);
    assert_eq!(session.pending_count(), 0);

    // Later requests are unaffected
    assert_eq!(
        session.invoke("fast", serde_json::json!({})).await.unwrap(),
        "fast done"
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_started_remote_call_finishes_after_cancel() {
    let session = connected(None).await;
    session.list_tools().await.unwrap();
    let tools = session.remote_tools();
    let slow = tools.iter().find(|t| t.name() == "mcp__fake__slow").unwrap();

    let token = CancellationToken::new();
    let ctx = ToolContext::new(std::env::temp_dir()).with_cancel(token.clone());
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let output = slow.execute(&serde_json::json!({}), &ctx).await.unwrap();
    canceller.await.unwrap();
    assert!(token.is_cancelled());
    assert!(output.success);
    assert_eq!(output.content, "slow done");
    assert_eq!(session.pending_count(), 0);
    session.disconnect().await;
}

#[tokio::test]
async fn test_manager_registers_and_removes_tools() {
    let registry = Arc::new(ToolRegistry::new());
    let manager = RpcManager::new(registry.clone());

    let count = manager.connect(&fake_config(None)).await.unwrap();
    assert_eq!(count, 3);
    assert!(registry.contains("mcp__fake__fast"));

    let status = manager.status().await;
    assert_eq!(status.len(), 1);
    assert!(status[0].connected);
    assert_eq!(status[0].tool_count, 3);

    let ctx = ToolContext::new(std::env::temp_dir());
    let output = registry
        .execute("mcp__fake__fast", &serde_json::json!({}), &ctx)
        .await;
    assert!(output.success);
    assert_eq!(output.content, "fast done");

    assert!(manager.disconnect("fake").await);
    assert!(!registry.contains("mcp__fake__fast"));
    assert!(registry.is_empty());
}
