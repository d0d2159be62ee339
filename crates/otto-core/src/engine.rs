// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use otto_config::Config;
use otto_events::{EngineEvent, EventBus};
use otto_model::{MessageId, ModelProvider, TaskId};
use otto_resilience::{CircuitBreaker, RetryPolicy};
use otto_store::{MessageRecord, Store, StoreError, TaskPhase, TaskRecord};
use otto_tools::{HttpFetchTool, ReadFileTool, RunCommandTool, ToolRegistry, WriteFileTool};

use crate::agent::AgentRegistry;
use crate::client::ResilientClient;
use crate::coordination_tools::{
    AwaitTasksTool, SendMessageTool, SpawnTaskTool, SubmitReportTool,
};
use crate::coordinator::{CoordError, Coordinator};
use crate::driver::TaskDriver;
use crate::invoker::ToolInvoker;
use crate::router;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("task {0} is terminal")]
    TerminalTask(TaskId),
    #[error("storage: {0}")]
    Store(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Storage(msg) => Self::Store(msg),
        }
    }
}

struct DriverHandle {
    desired_tx: watch::Sender<TaskPhase>,
    wake: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Shared engine state.  Coordination tools hold a `Weak` back-reference to
/// it, which is why construction goes through `Arc::new_cyclic`.
pub(crate) struct EngineInner {
    config: Config,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) agents: AgentRegistry,
    pub(crate) client: Arc<ResilientClient>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) invoker: Arc<ToolInvoker>,
    pub(crate) coordinator: Arc<Coordinator>,
    drivers: Mutex<HashMap<TaskId, DriverHandle>>,
    shutdown_tx: watch::Sender<bool>,
}

/// The Task Execution Engine façade.
///
/// Owns one driver per live Task, the event bus, the tool registry and the
/// resilient provider client.  All public operations express intent through
/// the repository plus per-driver channels; drivers converge.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn Store>, provider: Arc<dyn ModelProvider>) -> Self {
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            bus.clone(),
            Duration::from_secs(config.engine.await_default_timeout_seconds),
        ));
        let client = Arc::new(ResilientClient::new(
            provider,
            RetryPolicy::from_config(&config.engine.retry),
            CircuitBreaker::from_config(&config.engine.circuit_breaker),
        ));
        let agents = AgentRegistry::from_config(&config.agents);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let mut registry = ToolRegistry::new();
            registry.register(ReadFileTool);
            registry.register(WriteFileTool);
            registry.register(RunCommandTool { timeout_secs: config.tools.timeout_secs });
            registry.register(HttpFetchTool { max_chars: config.tools.fetch_max_chars });
            registry.register(SpawnTaskTool { engine: weak.clone() });
            registry.register(SendMessageTool { engine: weak.clone() });
            registry.register(AwaitTasksTool { engine: weak.clone() });
            registry.register(SubmitReportTool { engine: weak.clone() });
            let registry = Arc::new(registry);
            let invoker = Arc::new(ToolInvoker::new(registry.clone(), bus.clone()));
            EngineInner {
                config,
                store,
                bus,
                agents,
                client,
                registry,
                invoker,
                coordinator,
                drivers: Mutex::new(HashMap::new()),
                shutdown_tx,
            }
        });
        Self { inner }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.inner.coordinator
    }

    /// Create a Task bound to `agent` and start its driver.
    pub async fn create_task(
        &self,
        agent: &str,
        project_dir: PathBuf,
        parent: Option<TaskId>,
    ) -> Result<TaskId, EngineError> {
        self.inner.create_task(agent, project_dir, parent).await
    }

    /// Append a user message and wake the Task's driver.
    pub async fn post_user_message(
        &self,
        task_id: TaskId,
        text: &str,
    ) -> Result<MessageId, EngineError> {
        self.inner.post_user_message(task_id, text).await
    }

    /// Request suspension of a Task and all its children.  Drivers observe
    /// the desired phase at their next boundary; an in-flight provider call
    /// is cancelled.
    pub async fn suspend_task(&self, task_id: TaskId) -> Result<Vec<TaskId>, EngineError> {
        let children = self
            .inner
            .store
            .set_desired_phase_with_children(task_id, TaskPhase::Suspended)
            .await?;
        self.inner.signal_desired(task_id, TaskPhase::Suspended);
        for child in &children {
            self.inner.signal_desired(*child, TaskPhase::Suspended);
        }
        info!(task = %task_id, children = children.len(), "suspension requested");
        Ok(children)
    }

    /// Clear a suspension; the Task returns to awaiting input.
    pub async fn resume_task(&self, task_id: TaskId) -> Result<(), EngineError> {
        self.inner
            .store
            .set_desired_phase(task_id, TaskPhase::AwaitingInput)
            .await?;
        self.inner.signal_desired(task_id, TaskPhase::AwaitingInput);
        self.inner.wake(task_id);
        Ok(())
    }

    /// Subscribe to a Task's event stream: replay of persisted messages
    /// first, then live events, gap-free and de-duplicated.
    pub async fn subscribe_task(
        &self,
        task_id: TaskId,
        after: Option<MessageId>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        router::subscribe_task(self.inner.store.clone(), self.inner.bus.clone(), task_id, after)
            .await
            .map_err(EngineError::from)
    }

    /// Drain mode: no new provider calls start, in-flight ones are
    /// cancelled, and drivers get `drain_timeout` to finish their current
    /// tool before being abandoned.
    pub async fn shutdown(&self) {
        info!("engine entering drain mode");
        let _ = self.inner.shutdown_tx.send(true);
        let handles: Vec<(TaskId, DriverHandle)> = {
            let mut drivers = self.inner.drivers.lock().unwrap();
            drivers.drain().collect()
        };
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.inner.config.engine.drain_timeout_secs);
        for (task_id, handle) in handles {
            handle.wake.notify_one();
            let mut join = handle.join;
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(task = %task_id, "driver did not drain in time; abandoning");
                    join.abort();
                }
            }
        }
        self.inner.bus.close();
    }
}

impl EngineInner {
    pub(crate) async fn create_task(
        self: &Arc<Self>,
        agent: &str,
        project_dir: PathBuf,
        parent: Option<TaskId>,
    ) -> Result<TaskId, EngineError> {
        let spec = self
            .agents
            .get(agent)
            .ok_or_else(|| EngineError::UnknownAgent(agent.to_string()))?;
        if let Some(parent_id) = parent {
            let parent_task = self.store.get_task(parent_id).await?;
            if parent_task.phase.is_terminal() {
                return Err(EngineError::TerminalTask(parent_id));
            }
        }
        let record = TaskRecord::new(agent, project_dir, parent);
        let task_id = record.id;
        self.store.create_task(record.clone()).await?;

        let (desired_tx, desired_rx) = watch::channel(record.desired_phase);
        let wake = Arc::new(Notify::new());
        let driver = TaskDriver {
            task_id,
            agent: spec.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            client: self.client.clone(),
            invoker: self.invoker.clone(),
            coordinator: self.coordinator.clone(),
            registry: self.registry.clone(),
            model: spec.model.clone().unwrap_or_else(|| self.config.model.name.clone()),
            max_tokens: self.config.model.max_tokens,
            temperature: self.config.model.temperature,
            context_window: self.config.model.context_window as usize,
            turn_limit: self.config.engine.turn_limit,
            desired_rx,
            wake: wake.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        let join = tokio::spawn(driver.run());
        self.drivers
            .lock()
            .unwrap()
            .insert(task_id, DriverHandle { desired_tx, wake, join });
        debug!(task = %task_id, agent, "task created");
        Ok(task_id)
    }

    pub(crate) async fn post_user_message(
        &self,
        task_id: TaskId,
        text: &str,
    ) -> Result<MessageId, EngineError> {
        let task = self.store.get_task(task_id).await?;
        if task.phase.is_terminal() {
            return Err(EngineError::TerminalTask(task_id));
        }
        let record = MessageRecord::user(task_id, text);
        let message_id = record.id;
        self.store.append_message(record).await?;
        self.bus.publish(EngineEvent::Message { task_id, message_id });
        self.wake(task_id);
        Ok(message_id)
    }

    /// `spawn_task` semantics: create the child, post its first user
    /// message, return immediately.
    pub(crate) async fn spawn_child(
        self: &Arc<Self>,
        parent_id: TaskId,
        agent: &str,
        prompt: &str,
    ) -> Result<TaskId, CoordError> {
        let parent = self.store.get_task(parent_id).await?;
        let parent_spec = self
            .agents
            .get(&parent.agent)
            .ok_or_else(|| CoordError::NotFound(format!("agent {}", parent.agent)))?;
        if !parent_spec.may_delegate_to(agent) {
            return Err(CoordError::PermissionDenied(format!(
                "agent {} may not delegate to {agent}",
                parent.agent
            )));
        }
        self.coordinator.check_child_budget(parent_id).await?;
        let child = self
            .create_task(agent, parent.project_dir.clone(), Some(parent_id))
            .await
            .map_err(|e| match e {
                EngineError::UnknownAgent(a) => CoordError::NotFound(format!("agent {a}")),
                EngineError::NotFound(w) => CoordError::NotFound(w),
                EngineError::TerminalTask(t) => {
                    CoordError::PermissionDenied(format!("task {t} is terminal"))
                }
                EngineError::Store(m) => CoordError::Store(m),
            })?;
        self.post_user_message(child, prompt).await.map_err(|e| match e {
            EngineError::NotFound(w) => CoordError::NotFound(w),
            other => CoordError::Store(other.to_string()),
        })?;
        Ok(child)
    }

    fn signal_desired(&self, task_id: TaskId, desired: TaskPhase) {
        let drivers = self.drivers.lock().unwrap();
        if let Some(handle) = drivers.get(&task_id) {
            let _ = handle.desired_tx.send(desired);
        }
    }

    fn wake(&self, task_id: TaskId) {
        let drivers = self.drivers.lock().unwrap();
        if let Some(handle) = drivers.get(&task_id) {
            handle.wake.notify_one();
        }
    }
}
