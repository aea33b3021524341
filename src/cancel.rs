//! Per-turn cancellation
//!
//! Every turn gets a fresh [`CancellationToken`]; it is passed explicitly
//! into the agent loop and down to tools. Per-turn producers such as a
//! deadline are attached to the turn and torn down with it.
//!
//! Ctrl-C is routed by one process-wide listener: installing a signal handler
//! replaces the default SIGINT behaviour for good, so the listener decides
//! between interrupting the active turn and reporting an idle interrupt.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Active {
    turn_id: u64,
    token: Option<CancellationToken>,
}

/// Issues per-turn tokens and routes interrupts to the active one
#[derive(Clone, Default)]
pub struct CancellationController {
    active: Arc<Mutex<Active>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a turn. Any token left from a previous turn is detached.
    pub fn begin_turn(&self) -> TurnCancellation {
        let token = CancellationToken::new();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.turn_id += 1;
        active.token = Some(token.clone());
        tracing::debug!(turn_id = active.turn_id, "Turn cancellation armed");
        TurnCancellation {
            turn_id: active.turn_id,
            token,
            controller: self.clone(),
            producers: Vec::new(),
        }
    }

    /// Cancel the active turn, if any. Returns whether a turn was cancelled.
    pub fn interrupt(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match &active.token {
            Some(token) if !token.is_cancelled() => {
                tracing::info!(turn_id = active.turn_id, "Interrupting active turn");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether a turn is currently armed
    pub fn has_active_turn(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .token
            .is_some()
    }

    /// Route interrupt signals until `signals` closes.
    ///
    /// Each signal cancels the active turn; when there is nothing left to
    /// cancel (no turn, or the turn is already cancelled) `on_idle` runs.
    pub fn route_interrupts<F>(&self, mut signals: mpsc::Receiver<()>, on_idle: F) -> JoinHandle<()>
    where
        F: Fn() + Send + 'static,
    {
        let controller = self.clone();
        tokio::spawn(async move {
            while signals.recv().await.is_some() {
                if !controller.interrupt() {
                    tracing::debug!("Interrupt with no running turn");
                    on_idle();
                }
            }
        })
    }

    /// Route Ctrl-C (SIGINT) for the rest of the process
    pub fn listen_ctrl_c<F>(&self, on_idle: F) -> JoinHandle<()>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                    break;
                }
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        self.route_interrupts(rx, on_idle)
    }

    fn finish(&self, turn_id: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.turn_id == turn_id {
            active.token = None;
        }
    }
}

/// Guard for one turn's token and its producers
pub struct TurnCancellation {
    turn_id: u64,
    token: CancellationToken,
    controller: CancellationController,
    producers: Vec<JoinHandle<()>>,
}

impl TurnCancellation {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the turn once `after` elapses
    pub fn with_timeout(mut self, after: Duration) -> Self {
        let token = self.token.clone();
        self.producers.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    tracing::info!(timeout_ms = after.as_millis() as u64, "Turn deadline reached");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        }));
        self
    }

    /// Attach an arbitrary producer future; it is aborted with the turn
    pub fn with_producer<F>(mut self, producer: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.producers.push(tokio::spawn(producer(self.token.clone())));
        self
    }
}

impl Drop for TurnCancellation {
    fn drop(&mut self) {
        for producer in &self.producers {
            producer.abort();
        }
        self.controller.finish(self.turn_id);
    }
}
