//! Human-in-the-Loop (HITL) confirmation
//!
//! Write-class tool calls are suspended until a [`ConfirmationHandler`]
//! approves or declines them. A declined call is never executed; its tool
//! message carries the rejection text instead.
//!
//! Supports:
//! - A policy with an auto-confirm switch and a per-skill tool allow-list
//! - [`ConfirmationManager`], which broadcasts requests to a UI and waits for
//!   an answer, with an optional timeout and configurable timeout action
//! - [`AutoApprove`] for non-interactive use

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};

/// Action to take when confirmation times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutAction {
    /// Reject the tool execution on timeout
    #[default]
    Reject,
    /// Auto-approve the tool execution on timeout
    AutoApprove,
}

/// Confirmation policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPolicy {
    /// Skip confirmation entirely
    #[serde(default)]
    pub auto_confirm: bool,
    /// Tools the active skill/command pre-approves
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
}

impl ConfirmationPolicy {
    pub fn auto_confirm() -> Self {
        Self {
            auto_confirm: true,
            ..Default::default()
        }
    }

    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.allowed_tools = tools.into_iter().collect();
        self
    }

    /// Whether a call to `tool_name` must be approved.
    ///
    /// `tool_requires` is the tool's own declaration; the policy can only
    /// waive confirmation, never add it.
    pub fn requires_confirmation(&self, tool_name: &str, tool_requires: bool) -> bool {
        tool_requires && !self.auto_confirm && !self.allowed_tools.contains(tool_name)
    }
}

/// A call waiting for approval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub tool_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
}

/// Confirmation response from user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    /// Whether the tool execution was approved
    pub approved: bool,
    /// Optional reason for rejection
    pub reason: Option<String>,
}

impl ConfirmationResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

/// Something that can decide whether a call may run
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn ask(&self, request: ConfirmationRequest) -> ConfirmationResponse;
}

/// Approves everything
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn ask(&self, _request: ConfirmationRequest) -> ConfirmationResponse {
        ConfirmationResponse::approve()
    }
}

struct PendingConfirmation {
    tool_name: String,
    created_at: Instant,
    response_tx: oneshot::Sender<ConfirmationResponse>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingConfirmation>>>;

/// Removes the pending entry if the waiting side goes away first
struct PendingGuard {
    pending: PendingMap,
    resolved_tx: broadcast::Sender<String>,
    tool_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.tool_id);
        if removed.is_some() {
            let _ = self.resolved_tx.send(self.tool_id.clone());
        }
    }
}

/// Routes confirmation requests to a UI and waits for the answer
pub struct ConfirmationManager {
    pending: PendingMap,
    request_tx: broadcast::Sender<ConfirmationRequest>,
    /// Ids leave the pending map through here, whatever the reason
    resolved_tx: broadcast::Sender<String>,
    timeout: Option<Duration>,
    timeout_action: TimeoutAction,
}

impl Default for ConfirmationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationManager {
    pub fn new() -> Self {
        let (request_tx, _) = broadcast::channel(16);
        let (resolved_tx, _) = broadcast::channel(64);
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_tx,
            resolved_tx,
            timeout: None,
            timeout_action: TimeoutAction::Reject,
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration, action: TimeoutAction) -> Self {
        self.timeout = Some(timeout);
        self.timeout_action = action;
        self
    }

    /// Receive every request that needs an answer
    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationRequest> {
        self.request_tx.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingConfirmation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle a confirmation response from the user
    ///
    /// Returns false if no confirmation was pending under `tool_id`.
    pub fn confirm(&self, tool_id: &str, approved: bool, reason: Option<String>) -> bool {
        let pending = self.lock().remove(tool_id);
        match pending {
            Some(confirmation) => {
                tracing::info!(
                    tool_id = %tool_id,
                    tool = %confirmation.tool_name,
                    approved,
                    waited_ms = confirmation.created_at.elapsed().as_millis() as u64,
                    "Confirmation received"
                );
                let _ = confirmation
                    .response_tx
                    .send(ConfirmationResponse { approved, reason });
                let _ = self.resolved_tx.send(tool_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Get the number of pending confirmations
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Ids and tool names of pending confirmations
    pub fn pending_confirmations(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .map(|(id, p)| (id.clone(), p.tool_name.clone()))
            .collect()
    }

    /// Cancel all pending confirmations
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (tool_id, confirmation) in drained {
            let _ = confirmation
                .response_tx
                .send(ConfirmationResponse::reject("Confirmation cancelled"));
            let _ = self.resolved_tx.send(tool_id);
        }
        count
    }

    /// Wait until `tool_id` is no longer pending: answered, timed out, or
    /// abandoned by a cancelled turn
    pub async fn resolved(&self, tool_id: &str) {
        let mut rx = self.resolved_tx.subscribe();
        if !self.lock().contains_key(tool_id) {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(id) if id == tool_id => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !self.lock().contains_key(tool_id) {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    fn timeout_response(&self) -> ConfirmationResponse {
        match self.timeout_action {
            TimeoutAction::Reject => ConfirmationResponse::reject("Confirmation timed out, action: rejected"),
            TimeoutAction::AutoApprove => ConfirmationResponse {
                approved: true,
                reason: Some("Confirmation timed out, action: auto_approved".to_string()),
            },
        }
    }
}

#[async_trait]
impl ConfirmationHandler for ConfirmationManager {
    async fn ask(&self, request: ConfirmationRequest) -> ConfirmationResponse {
        let (tx, rx) = oneshot::channel();
        let tool_id = request.tool_id.clone();
        self.lock().insert(
            tool_id.clone(),
            PendingConfirmation {
                tool_name: request.tool_name.clone(),
                created_at: Instant::now(),
                response_tx: tx,
            },
        );
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            resolved_tx: self.resolved_tx.clone(),
            tool_id: tool_id.clone(),
        };

        if self.request_tx.send(request).is_err() {
            tracing::warn!(tool_id = %tool_id, "No confirmation listener; rejecting");
            return ConfirmationResponse::reject("No confirmation listener available");
        }

        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(tool_id = %tool_id, action = ?self.timeout_action, "Confirmation timed out");
                    return self.timeout_response();
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| ConfirmationResponse::reject("Confirmation cancelled"))
    }
}
