// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use otto_events::{EngineEvent, EventBus};
use otto_model::{ChatMessage, CompletionRequest, ContentBlock, Role, TaskId, ToolDescriptor};
use otto_store::{MessageRecord, Store, StoreError, TaskPhase, TaskRecord};
use otto_tools::{ToolEnv, ToolRegistry};

use crate::client::{InvokeOptions, ResilientClient};
use crate::coordination_tools::COORDINATION_TOOLS;
use crate::coordinator::Coordinator;
use crate::invoker::ToolInvoker;
use crate::AgentSpec;

/// Outcome of one `Running` stretch (one user input worth of turns).
enum TurnOutcome {
    AwaitInput,
    Completed,
    Failed(String),
    Suspended,
    Shutdown,
}

/// The per-Task driver: exactly one instance per Task mutates its phase.
///
/// The driver converges the observed phase to the desired phase at every
/// boundary; an in-flight provider call is raced against the desired-phase
/// channel and dropped on suspension, while a running tool is always
/// allowed to finish.
pub(crate) struct TaskDriver {
    pub(crate) task_id: TaskId,
    pub(crate) agent: Arc<AgentSpec>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) client: Arc<ResilientClient>,
    pub(crate) invoker: Arc<ToolInvoker>,
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) model: String,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) temperature: Option<f32>,
    pub(crate) context_window: usize,
    pub(crate) turn_limit: u32,
    pub(crate) desired_rx: watch::Receiver<TaskPhase>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl TaskDriver {
    pub(crate) async fn run(mut self) {
        debug!(task = %self.task_id, agent = %self.agent.name, "driver started");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            let task = match self.store.get_task(self.task_id).await {
                Ok(t) => t,
                Err(StoreError::NotFound(_)) => {
                    warn!(task = %self.task_id, "task record missing; driver exiting");
                    break;
                }
                Err(e) => {
                    warn!(task = %self.task_id, error = %e, "task load failed; driver exiting");
                    break;
                }
            };
            if task.phase.is_terminal() {
                break;
            }

            let desired = *self.desired_rx.borrow();
            if desired == TaskPhase::Suspended && task.phase != TaskPhase::Suspended {
                self.transition(TaskPhase::Suspended, None).await;
                continue;
            }
            if task.phase == TaskPhase::Suspended {
                if desired == TaskPhase::AwaitingInput {
                    self.transition(TaskPhase::AwaitingInput, None).await;
                    continue;
                }
                if self.wait_any().await {
                    break;
                }
                continue;
            }

            // AwaitingInput: a turn starts only on an unprocessed user message.
            let has_input = match self.store.list_messages(self.task_id).await {
                Ok(msgs) => msgs
                    .iter()
                    .any(|m| m.role == Role::User && m.processed_at.is_none()),
                Err(e) => {
                    warn!(task = %self.task_id, error = %e, "message list failed");
                    false
                }
            };
            if !has_input {
                if self.wait_any().await {
                    break;
                }
                continue;
            }

            self.transition(TaskPhase::Running, None).await;
            match self.run_turns(&task).await {
                TurnOutcome::AwaitInput => {
                    self.transition(TaskPhase::AwaitingInput, None).await;
                }
                TurnOutcome::Completed => {
                    self.coordinator.discard_child_mailboxes(self.task_id).await;
                    self.transition(TaskPhase::Completed, None).await;
                }
                TurnOutcome::Failed(reason) => {
                    warn!(task = %self.task_id, reason = %reason, "task failed");
                    self.coordinator.discard_child_mailboxes(self.task_id).await;
                    self.transition(TaskPhase::Failed, Some(reason)).await;
                }
                TurnOutcome::Suspended => {
                    self.transition(TaskPhase::Suspended, None).await;
                }
                TurnOutcome::Shutdown => break,
            }
        }
        debug!(task = %self.task_id, "driver exited");
    }

    /// The tool loop for one user input: provider call → tool execution →
    /// repeat, until the model stops requesting tools or a bound trips.
    async fn run_turns(&mut self, task: &TaskRecord) -> TurnOutcome {
        let mut calls: u32 = 0;
        loop {
            // Boundary checks between provider calls.
            if *self.desired_rx.borrow() == TaskPhase::Suspended {
                return TurnOutcome::Suspended;
            }
            if *self.shutdown_rx.borrow() {
                return TurnOutcome::Shutdown;
            }

            calls += 1;
            if calls > self.turn_limit {
                return TurnOutcome::Failed("turn_limit_exceeded".into());
            }

            let records = match self.store.list_messages(self.task_id).await {
                Ok(r) => r,
                Err(StoreError::NotFound(_)) => return TurnOutcome::Failed("task_missing".into()),
                Err(e) => return TurnOutcome::Failed(format!("storage: {e}")),
            };
            let history: Vec<ChatMessage> = records
                .iter()
                .map(|m| ChatMessage { role: m.role, blocks: m.blocks.clone() })
                .collect();
            let tools = self.descriptors();

            // Context budget: fail loudly rather than silently truncating.
            if self.projected_tokens(&history, &tools) > self.context_window {
                return TurnOutcome::Failed("context_overflow".into());
            }

            let req = CompletionRequest {
                model: self.model.clone(),
                system_prompt: self.agent.instructions.clone(),
                messages: history,
                tools,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };

            debug!(task = %self.task_id, call = calls, "provider turn");
            let client = Arc::clone(&self.client);
            let invoke = async move { client.invoke(req, InvokeOptions::default()).await };
            tokio::pin!(invoke);
            let mut desired = self.desired_rx.clone();
            let mut shutdown = self.shutdown_rx.clone();
            let result = tokio::select! {
                biased;
                outcome = interrupt(&mut desired, &mut shutdown) => return outcome,
                res = &mut invoke => res,
            };

            let assistant = match result {
                Ok(m) => m,
                Err(e) => {
                    return TurnOutcome::Failed(format!("provider {}: {}", e.kind, e.message))
                }
            };

            if let Err(e) = self.store.add_usage(self.task_id, assistant.usage).await {
                warn!(task = %self.task_id, error = %e, "usage accounting failed");
            }

            // Persist the assistant message; the persistence step is the
            // linearization point for message ordering.
            let rec = MessageRecord::new(self.task_id, Role::Assistant, assistant.blocks.clone())
                .with_usage(assistant.usage);
            let rec_id = rec.id;
            if let Err(e) = self.store.append_message(rec).await {
                return TurnOutcome::Failed(format!("storage: {e}"));
            }
            let _ = self.store.mark_processed(rec_id, Utc::now()).await;
            self.bus.publish(EngineEvent::Message {
                task_id: self.task_id,
                message_id: rec_id,
            });

            // The inputs of this call are now incorporated.
            for m in records.iter().filter(|m| m.processed_at.is_none()) {
                let _ = self.store.mark_processed(m.id, Utc::now()).await;
            }

            let tool_calls: Vec<(String, String, serde_json::Value)> = assistant
                .blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall { id, tool_name, args } => {
                        Some((id.clone(), tool_name.clone(), args.clone()))
                    }
                    _ => None,
                })
                .collect();

            if tool_calls.is_empty() {
                if self.coordinator.take_completion_request(self.task_id) {
                    return TurnOutcome::Completed;
                }
                return TurnOutcome::AwaitInput;
            }

            let env = ToolEnv {
                project_dir: task.project_dir.clone(),
                task_id: self.task_id,
                parent_id: task.parent_id,
                store: Arc::clone(&self.store),
                events: Arc::clone(&self.bus),
            };
            let result_blocks = self.invoker.invoke_all(&env, &tool_calls).await;

            let tool_rec = MessageRecord::new(self.task_id, Role::Tool, result_blocks);
            let tool_rec_id = tool_rec.id;
            if let Err(e) = self.store.append_message(tool_rec).await {
                return TurnOutcome::Failed(format!("storage: {e}"));
            }
            let _ = self.store.mark_processed(tool_rec_id, Utc::now()).await;
            self.bus.publish(EngineEvent::Message {
                task_id: self.task_id,
                message_id: tool_rec_id,
            });

            if self.coordinator.take_completion_request(self.task_id) {
                return TurnOutcome::Completed;
            }
        }
    }

    /// Active tool set: the agent's allowlist plus the coordination
    /// built-ins; an empty allowlist means every registered tool.
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        if self.agent.tools.is_empty() {
            return self.registry.descriptors();
        }
        let mut allowed = self.agent.tools.clone();
        allowed.extend(COORDINATION_TOOLS.iter().map(|s| s.to_string()));
        self.registry.descriptors_for(&allowed)
    }

    /// 4-chars-per-token projection of the next request.
    fn projected_tokens(&self, history: &[ChatMessage], tools: &[ToolDescriptor]) -> usize {
        let history_tokens: usize = history.iter().map(|m| m.approx_tokens()).sum();
        let tool_tokens: usize = tools
            .iter()
            .map(|t| (t.name.len() + t.description.len() + t.input_schema.to_string().len()) / 4)
            .sum();
        history_tokens + tool_tokens + self.agent.instructions.len() / 4
    }

    async fn transition(&self, phase: TaskPhase, reason: Option<String>) {
        if let Err(e) = self.store.set_phase(self.task_id, phase, reason).await {
            warn!(task = %self.task_id, phase = %phase, error = %e, "phase update failed");
        }
        let event = match phase {
            TaskPhase::Suspended => EngineEvent::TaskSuspended { task_id: self.task_id },
            TaskPhase::Completed => EngineEvent::TaskCompleted { task_id: self.task_id },
            _ => EngineEvent::Task { task_id: self.task_id },
        };
        self.bus.publish(event);
    }

    /// Park until a wake, a desired-phase change, or shutdown.  Returns
    /// true when the driver should exit (its channels are gone).
    async fn wait_any(&mut self) -> bool {
        let wake = Arc::clone(&self.wake);
        tokio::select! {
            _ = wake.notified() => false,
            res = self.desired_rx.changed() => res.is_err(),
            res = self.shutdown_rx.changed() => res.is_err(),
        }
    }
}

/// Resolves when suspension or shutdown is requested; pends otherwise.
/// Used to race (and thereby cancel) the in-flight provider call.
async fn interrupt(
    desired: &mut watch::Receiver<TaskPhase>,
    shutdown: &mut watch::Receiver<bool>,
) -> TurnOutcome {
    loop {
        tokio::select! {
            res = desired.changed() => {
                if res.is_err() {
                    return TurnOutcome::Shutdown;
                }
                if *desired.borrow() == TaskPhase::Suspended {
                    return TurnOutcome::Suspended;
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    return TurnOutcome::Shutdown;
                }
            }
        }
    }
}
