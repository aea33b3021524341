//! Agent Loop Implementation
//!
//! Core agent loop that handles tool execution, confirmation and
//! cancellation, following the tool-calling pattern:
//! 1. Append the user message to history
//! 2. Send history + tool definitions to the model
//! 3. If the model returns tool calls, run them (concurrent class first,
//!    then the sequential class in order) and append one result per call
//! 4. Repeat until the model answers without tool calls
//!
//! Cancellation is cooperative. The token passed to [`AgentLoop::run_turn`]
//! is checked between rounds, between batches, before each sequential call
//! and while waiting for confirmation; work that already started is allowed
//! to finish.

use crate::error::{Result, ShellError};
use crate::hitl::{ConfirmationHandler, ConfirmationPolicy, ConfirmationRequest};
use crate::llm::{LlmClient, Message, Role, ToolCall};
use crate::prompts;
use crate::tools::{ExecutionClass, ToolContext, ToolOutput, ToolRegistry};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Maximum number of model round-trips per turn
const MAX_TOOL_ROUNDS: usize = 50;

/// Tool message for a call that never ran because the turn was cancelled
const CANCELLED_RESULT: &str = "Tool call cancelled before it ran";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Inserted as the first message of a fresh history
    pub system_prompt: Option<String>,
    pub max_tool_rounds: usize,
    pub policy: ConfirmationPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(prompts::DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tool_rounds: MAX_TOOL_ROUNDS,
            policy: ConfirmationPolicy::default(),
        }
    }
}

/// Interaction mode; selects the directive appended to the user message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Plan,
    #[default]
    Build,
}

impl Mode {
    pub fn directive(&self) -> &'static str {
        match self {
            Mode::Plan => prompts::MODE_PLAN,
            Mode::Build => prompts::MODE_BUILD,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Plan => f.write_str("plan"),
            Mode::Build => f.write_str("build"),
        }
    }
}

/// Labelled content attached to a turn (e.g. a file the user pulled in)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextItem {
    pub label: String,
    pub content: String,
}

/// Everything that goes into one user message
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub context: Vec<ContextItem>,
    /// Active skill/command instructions
    pub instructions: Option<String>,
    pub mode: Mode,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, label: impl Into<String>, content: impl Into<String>) -> Self {
        self.context.push(ContextItem {
            label: label.into(),
            content: content.into(),
        });
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Context items, then instructions, then the input, then the mode directive
    pub fn compose(&self) -> String {
        let mut out = String::new();
        for item in &self.context {
            out.push_str(&format!(
                "<context label=\"{}\">\n{}\n</context>\n\n",
                item.label,
                item.content.trim_end()
            ));
        }
        if let Some(instructions) = &self.instructions {
            out.push_str(instructions.trim_end());
            out.push_str("\n\n");
        }
        out.push_str(&self.text);
        out.push_str("\n\n");
        out.push_str(self.mode.directive().trim_end());
        out
    }
}

/// Events emitted during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// A model round started
    #[serde(rename = "turn_start")]
    TurnStart { round: usize },

    /// Text the model produced alongside tool calls
    #[serde(rename = "assistant_text")]
    AssistantText { text: String },

    #[serde(rename = "tool_start")]
    ToolStart { id: String, name: String },

    #[serde(rename = "tool_end")]
    ToolEnd {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Confirmation was declined; the tool never ran
    #[serde(rename = "tool_rejected")]
    ToolRejected {
        id: String,
        name: String,
        reason: String,
    },

    /// Final answer
    #[serde(rename = "end")]
    End { text: String },

    #[serde(rename = "cancelled")]
    Cancelled,

    #[serde(rename = "error")]
    Error { message: String },
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { text: String, tool_calls: usize },
    Cancelled,
}

/// Result of [`AgentLoop::compact`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    Compacted { before: usize, after: usize },
    /// At most one collapsible message; the model was not called
    Skipped,
}

/// Messages compaction may fold into the summary
fn is_collapsible(message: &Message) -> bool {
    !matches!(message.role, Role::System | Role::Tool)
}

/// Replace every collapsible message with one summary message.
///
/// System and tool messages are kept in order. The summary takes the place of
/// the first collapsed message. Tool messages may end up without their
/// assistant call; adapters must tolerate that.
pub fn compact_messages(history: &[Message], summary: &str) -> Vec<Message> {
    let mut out = Vec::with_capacity(history.len());
    let mut summarized = false;
    for message in history {
        if !is_collapsible(message) {
            out.push(message.clone());
        } else if !summarized {
            out.push(Message::user(format!(
                "{}{}",
                prompts::CONTEXT_SUMMARY_PREFIX,
                summary
            )));
            summarized = true;
        }
    }
    out
}

/// A tool call that passed lookup and argument parsing
struct PreparedCall<'a> {
    index: usize,
    call: &'a ToolCall,
    args: serde_json::Value,
}

/// Agent loop executor
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
    workspace: PathBuf,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    event_tx: Option<mpsc::Sender<AgentEvent>>,
    history: Vec<Message>,
}

impl AgentLoop {
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Drop the whole history; the system prompt is re-inserted on the next turn
    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.config.policy
    }

    pub fn set_policy(&mut self, policy: ConfirmationPolicy) {
        self.config.policy = policy;
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).await.ok();
        }
    }

    /// Run one user turn to completion, cancellation or failure
    pub async fn run_turn(
        &mut self,
        input: TurnInput,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let span = tracing::info_span!(
            "a3s.agent.turn",
            "a3s.agent.mode" = %input.mode,
            "a3s.agent.history_len" = self.history.len(),
        );
        self.run_turn_inner(input, cancel).instrument(span).await
    }

    async fn run_turn_inner(
        &mut self,
        input: TurnInput,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if self.history.is_empty() {
            if let Some(system) = &self.config.system_prompt {
                self.history.push(Message::system(system.clone()));
            }
        }
        self.history.push(Message::user(input.compose()));

        // Snapshot: registrations made during the turn apply from the next one
        let definitions = self.registry.definitions();
        let ctx = ToolContext::new(self.workspace.clone()).with_cancel(cancel.clone());
        let mut total_calls = 0;
        let mut round = 0;

        loop {
            round += 1;
            if round > self.config.max_tool_rounds {
                let err = ShellError::MaxToolRounds(self.config.max_tool_rounds);
                self.emit(AgentEvent::Error {
                    message: err.to_string(),
                })
                .await;
                return Err(err);
            }
            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled().await);
            }

            self.emit(AgentEvent::TurnStart { round }).await;
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.finish_cancelled().await),
                response = self.llm.chat(&self.history, &definitions) => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::error!(round, "Model call failed: {}", message);
                    self.emit(AgentEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                    return Err(ShellError::Adapter(message));
                }
            };
            tracing::debug!(
                round,
                tool_calls = response.tool_calls().len(),
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                "Model responded"
            );

            let calls = response.tool_calls().to_vec();
            if calls.is_empty() {
                let text = response.text().to_string();
                self.history.push(Message::assistant(text.clone()));
                self.emit(AgentEvent::End { text: text.clone() }).await;
                tracing::info!(rounds = round, tool_calls = total_calls, "Turn completed");
                return Ok(TurnOutcome::Completed {
                    text,
                    tool_calls: total_calls,
                });
            }

            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled().await);
            }

            let content = response
                .message
                .content
                .clone()
                .filter(|text| !text.trim().is_empty());
            if let Some(text) = &content {
                self.emit(AgentEvent::AssistantText { text: text.clone() })
                    .await;
            }
            self.history
                .push(Message::assistant_tool_calls(content, calls.clone()));
            total_calls += calls.len();

            let results = self.execute_batch(&calls, &ctx, cancel).await;
            self.history.extend(results);

            if cancel.is_cancelled() {
                return Ok(self.finish_cancelled().await);
            }
        }
    }

    async fn finish_cancelled(&self) -> TurnOutcome {
        tracing::info!("Turn cancelled");
        self.emit(AgentEvent::Cancelled).await;
        TurnOutcome::Cancelled
    }

    /// Run one batch of calls and return one tool message per call, in call order
    async fn execute_batch(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Vec<Message> {
        let mut results: Vec<Option<String>> = vec![None; calls.len()];
        let mut concurrent = Vec::new();
        let mut sequential = Vec::new();

        for (index, call) in calls.iter().enumerate() {
            let tool = match self.registry.resolve(&call.name) {
                Ok(tool) => tool,
                Err(e) => {
                    tracing::warn!(tool = %call.name, "Model requested an unknown tool");
                    results[index] = Some(self.failed_call(call, e.to_string()).await);
                    continue;
                }
            };
            let args = match call.parse_arguments() {
                Ok(args) => args,
                Err(e) => {
                    let err = ShellError::InvalidArguments {
                        tool: call.name.clone(),
                        reason: e.to_string(),
                    };
                    results[index] = Some(self.failed_call(call, err.to_string()).await);
                    continue;
                }
            };

            let needs_confirmation = self
                .config
                .policy
                .requires_confirmation(&call.name, tool.requires_confirmation());
            let prepared = PreparedCall { index, call, args };
            if tool.class() == ExecutionClass::Concurrent && !needs_confirmation {
                concurrent.push(prepared);
            } else {
                sequential.push((prepared, needs_confirmation));
            }
        }

        if !concurrent.is_empty() && !cancel.is_cancelled() {
            let outputs = join_all(
                concurrent
                    .iter()
                    .map(|prepared| self.invoke(prepared.call, &prepared.args, ctx)),
            )
            .await;
            for (prepared, output) in concurrent.iter().zip(outputs) {
                results[prepared.index] = Some(output.content);
            }
        }

        for (prepared, needs_confirmation) in &sequential {
            if cancel.is_cancelled() {
                break;
            }
            let call = prepared.call;

            if *needs_confirmation {
                let response = match &self.confirmation {
                    Some(handler) => {
                        let request = ConfirmationRequest {
                            tool_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            args: prepared.args.clone(),
                        };
                        let answered = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            response = handler.ask(request) => Some(response),
                        };
                        match answered {
                            Some(response) => response,
                            None => break,
                        }
                    }
                    None => crate::hitl::ConfirmationResponse::reject(
                        "No confirmation handler configured",
                    ),
                };

                if !response.approved {
                    let reason = response
                        .reason
                        .unwrap_or_else(|| "Declined by user".to_string());
                    tracing::info!(tool = %call.name, reason = %reason, "Tool call rejected");
                    self.emit(AgentEvent::ToolRejected {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                    results[prepared.index] =
                        Some(format!("Tool call rejected by user: {}", reason));
                    continue;
                }
            }

            let output = self.invoke(call, &prepared.args, ctx).await;
            results[prepared.index] = Some(output.content);
        }

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| {
                Message::tool_result(
                    call.id.clone(),
                    result.unwrap_or_else(|| CANCELLED_RESULT.to_string()),
                )
            })
            .collect()
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutput {
        self.emit(AgentEvent::ToolStart {
            id: call.id.clone(),
            name: call.name.clone(),
        })
        .await;
        let output = self.registry.execute(&call.name, args, ctx).await;
        self.emit(AgentEvent::ToolEnd {
            id: call.id.clone(),
            name: call.name.clone(),
            output: output.content.clone(),
            success: output.success,
        })
        .await;
        output
    }

    /// Error result for a call that could not be dispatched
    async fn failed_call(&self, call: &ToolCall, message: String) -> String {
        self.emit(AgentEvent::ToolEnd {
            id: call.id.clone(),
            name: call.name.clone(),
            output: message.clone(),
            success: false,
        })
        .await;
        message
    }

    /// Summarize the conversation into a single message.
    ///
    /// Calling this again without new user or assistant messages is a no-op.
    pub async fn compact(&mut self) -> Result<CompactionOutcome> {
        let collapsible: Vec<&Message> =
            self.history.iter().filter(|m| is_collapsible(m)).collect();
        if collapsible.len() <= 1 {
            tracing::debug!("Nothing to compact");
            return Ok(CompactionOutcome::Skipped);
        }

        let conversation = collapsible
            .iter()
            .map(|msg| {
                let mut line = format!("{}: {}", msg.role, msg.text());
                for call in &msg.tool_calls {
                    line.push_str(&format!("\n[called {} with {}]", call.name, call.arguments));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::render(prompts::CONTEXT_COMPACT, &[("conversation", &conversation)]);
        let response = self
            .llm
            .chat(&[Message::user(prompt)], &[])
            .await
            .map_err(|e| ShellError::Adapter(format!("{:#}", e)))?;

        let before = self.history.len();
        self.history = compact_messages(&self.history, response.text());
        let after = self.history.len();
        tracing::info!("Compaction complete: {} messages -> {} messages", before, after);
        Ok(CompactionOutcome::Compacted { before, after })
    }
}

/// Builder for creating an agent loop
pub struct AgentBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<Arc<ToolRegistry>>,
    config: AgentConfig,
    workspace: PathBuf,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    event_tx: Option<mpsc::Sender<AgentEvent>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            registry: None,
            config: AgentConfig::default(),
            workspace: PathBuf::from("."),
            confirmation: None,
            event_tx: None,
        }
    }

    pub fn llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.config.system_prompt = prompt;
        self
    }

    pub fn max_tool_rounds(mut self, max: usize) -> Self {
        self.config.max_tool_rounds = max;
        self
    }

    pub fn policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn confirmation_handler(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn event_sender(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<AgentLoop> {
        let llm = self
            .llm
            .ok_or_else(|| ShellError::Config("LLM client is required".to_string()))?;
        let registry = self
            .registry
            .ok_or_else(|| ShellError::Config("Tool registry is required".to_string()))?;

        Ok(AgentLoop {
            llm,
            registry,
            config: self.config,
            workspace: self.workspace,
            confirmation: self.confirmation,
            event_tx: self.event_tx,
            history: Vec::new(),
        })
    }
}
