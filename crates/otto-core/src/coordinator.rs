// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use otto_events::{EventBus, EventKind};
use otto_model::TaskId;
use otto_store::{Store, StoreError};

use crate::mailbox::Mailboxes;

/// Cap on direct children per Task.
const MAX_CHILDREN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("permission_denied: {0}")]
    PermissionDenied(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("timeout: tasks still incomplete: {0:?}")]
    Timeout(Vec<TaskId>),
    #[error("too_many_children: a task may have at most {MAX_CHILDREN} children")]
    TooManyChildren,
    #[error("storage: {0}")]
    Store(String),
}

impl From<StoreError> for CoordError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Storage(msg) => Self::Store(msg),
        }
    }
}

/// Drained result for one awaited child.
#[derive(Debug, Clone)]
pub struct ChildReport {
    pub task_id: TaskId,
    pub messages: Vec<serde_json::Value>,
}

/// Parent/child linkage: the inter-task mailbox, bounded waits for child
/// completion, and completion requests recorded by `submit_report`.
pub struct Coordinator {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    mailboxes: Mailboxes,
    completion_requests: Mutex<HashSet<TaskId>>,
    default_await_timeout: Duration,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, default_await_timeout: Duration) -> Self {
        Self {
            store,
            bus,
            mailboxes: Mailboxes::new(),
            completion_requests: Mutex::new(HashSet::new()),
            default_await_timeout,
        }
    }

    /// Enforce the children cap before a spawn.
    pub async fn check_child_budget(&self, parent: TaskId) -> Result<(), CoordError> {
        let children = self.store.list_children(parent).await?;
        if children.len() >= MAX_CHILDREN {
            return Err(CoordError::TooManyChildren);
        }
        Ok(())
    }

    /// `send_message(to:"parent")`: append to the caller's mailbox.
    ///
    /// Errors with `permission_denied` when the caller has no parent —
    /// an explicit error is easier to debug than a silent no-op.
    pub async fn deliver_to_parent(
        &self,
        child: TaskId,
        content: serde_json::Value,
    ) -> Result<(), CoordError> {
        let task = self.store.get_task(child).await?;
        let parent = task
            .parent_id
            .ok_or_else(|| CoordError::PermissionDenied("task has no parent".into()))?;
        debug!(child = %child, parent = %parent, "message delivered to parent mailbox");
        self.mailboxes.push(child, content);
        Ok(())
    }

    /// Block until every listed child reached a terminal phase, or the
    /// timeout elapsed.
    ///
    /// The completion-event subscription is attached *before* the first
    /// phase check so a completion landing between check and subscribe
    /// cannot be missed.  Ownership is verified for every id: all must be
    /// direct children of `caller`.
    pub async fn await_children(
        &self,
        caller: TaskId,
        ids: &[TaskId],
        timeout: Option<Duration>,
    ) -> Result<Vec<ChildReport>, CoordError> {
        for id in ids {
            let task = self.store.get_task(*id).await.map_err(|e| match e {
                StoreError::NotFound(what) => CoordError::NotFound(what),
                other => other.into(),
            })?;
            if task.parent_id != Some(caller) {
                return Err(CoordError::PermissionDenied(format!(
                    "task {id} is not a child of {caller}"
                )));
            }
        }

        // Subscribe before the first completion check.
        let idset: HashSet<TaskId> = ids.iter().copied().collect();
        let (mut rx, handle) = self.bus.subscribe(
            &[EventKind::TaskCompleted, EventKind::Task],
            move |e| idset.contains(&e.task_id()),
            64,
        );

        let deadline = timeout.unwrap_or(self.default_await_timeout);
        let wait = async {
            loop {
                let mut incomplete = Vec::new();
                for id in ids {
                    if !self.store.get_task(*id).await?.phase.is_terminal() {
                        incomplete.push(*id);
                    }
                }
                if incomplete.is_empty() {
                    return Ok(());
                }
                if rx.recv().await.is_none() {
                    // Bus closed (shutdown); report what is still pending.
                    return Err(CoordError::Timeout(incomplete));
                }
            }
        };

        let outcome = tokio::time::timeout(deadline, wait).await;
        self.bus.unsubscribe(handle);

        match outcome {
            Ok(Ok(())) => {
                let reports = ids
                    .iter()
                    .map(|id| ChildReport { task_id: *id, messages: self.mailboxes.drain(*id) })
                    .collect();
                Ok(reports)
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                let mut incomplete = Vec::new();
                for id in ids {
                    match self.store.get_task(*id).await {
                        Ok(t) if !t.phase.is_terminal() => incomplete.push(*id),
                        _ => {}
                    }
                }
                Err(CoordError::Timeout(incomplete))
            }
        }
    }

    /// Record that `submit_report(completed=true)` ran for this Task.  The
    /// driver picks it up at the end of the current tool batch.
    pub fn request_completion(&self, task: TaskId) {
        self.completion_requests.lock().unwrap().insert(task);
    }

    pub fn take_completion_request(&self, task: TaskId) -> bool {
        self.completion_requests.lock().unwrap().remove(&task)
    }

    /// Drop undrained mailboxes of a terminal parent's children.
    pub async fn discard_child_mailboxes(&self, parent: TaskId) {
        if let Ok(children) = self.store.list_children(parent).await {
            for child in children {
                self.mailboxes.discard(child.id);
            }
        }
    }

    pub fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use otto_events::EngineEvent;
    use otto_store::{MemoryStore, TaskPhase, TaskRecord};

    async fn harness() -> (Arc<MemoryStore>, Arc<EventBus>, Coordinator, TaskId) {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let coordinator =
            Coordinator::new(store.clone(), bus.clone(), Duration::from_secs(300));
        let parent = TaskRecord::new("lead", PathBuf::from("/tmp"), None);
        let parent_id = parent.id;
        store.create_task(parent).await.unwrap();
        (store, bus, coordinator, parent_id)
    }

    async fn child_of(store: &MemoryStore, parent: TaskId) -> TaskId {
        let child = TaskRecord::new("scout", PathBuf::from("/tmp"), Some(parent));
        let id = child.id;
        store.create_task(child).await.unwrap();
        id
    }

    #[tokio::test]
    async fn deliver_without_parent_is_permission_denied() {
        let (_store, _bus, coordinator, parent) = harness().await;
        let err = coordinator.deliver_to_parent(parent, json!({})).await.err().unwrap();
        assert!(matches!(err, CoordError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn await_rejects_non_child_ids() {
        let (store, _bus, coordinator, parent) = harness().await;
        let stranger = TaskRecord::new("x", PathBuf::from("/tmp"), None);
        let stranger_id = stranger.id;
        store.create_task(stranger).await.unwrap();
        let err = coordinator
            .await_children(parent, &[stranger_id], None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoordError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn await_rejects_unknown_ids() {
        let (_store, _bus, coordinator, parent) = harness().await;
        let err = coordinator
            .await_children(parent, &[TaskId::new()], None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoordError::NotFound(_)));
    }

    #[tokio::test]
    async fn await_returns_immediately_for_already_terminal_children() {
        let (store, _bus, coordinator, parent) = harness().await;
        let child = child_of(&store, parent).await;
        coordinator.mailboxes().push(child, json!({"found": 7}));
        store.set_phase(child, TaskPhase::Completed, None).await.unwrap();
        let reports = coordinator.await_children(parent, &[child], None).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].task_id, child);
        assert_eq!(reports[0].messages, vec![json!({"found": 7})]);
    }

    #[tokio::test]
    async fn await_unblocks_on_completion_event() {
        let (store, bus, coordinator, parent) = harness().await;
        let child = child_of(&store, parent).await;

        let store2 = store.clone();
        let bus2 = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store2.set_phase(child, TaskPhase::Completed, None).await.unwrap();
            bus2.publish(EngineEvent::TaskCompleted { task_id: child });
        });

        let reports = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.await_children(parent, &[child], None),
        )
        .await
        .expect("must not hit the outer timeout")
        .unwrap();
        assert_eq!(reports[0].task_id, child);
    }

    #[tokio::test]
    async fn await_timeout_lists_incomplete_ids() {
        let (store, _bus, coordinator, parent) = harness().await;
        let done = child_of(&store, parent).await;
        let pending = child_of(&store, parent).await;
        store.set_phase(done, TaskPhase::Completed, None).await.unwrap();
        let err = coordinator
            .await_children(parent, &[done, pending], Some(Duration::from_millis(30)))
            .await
            .err()
            .unwrap();
        match err {
            CoordError::Timeout(incomplete) => assert_eq!(incomplete, vec![pending]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_children_also_count_as_terminal() {
        let (store, _bus, coordinator, parent) = harness().await;
        let child = child_of(&store, parent).await;
        store
            .set_phase(child, TaskPhase::Failed, Some("boom".into()))
            .await
            .unwrap();
        let reports = coordinator.await_children(parent, &[child], None).await.unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn completion_requests_are_one_shot() {
        let (_store, _bus, coordinator, parent) = harness().await;
        assert!(!coordinator.take_completion_request(parent));
        coordinator.request_completion(parent);
        assert!(coordinator.take_completion_request(parent));
        assert!(!coordinator.take_completion_request(parent));
    }

    #[tokio::test]
    async fn child_budget_is_enforced() {
        let (store, _bus, coordinator, parent) = harness().await;
        for _ in 0..MAX_CHILDREN {
            child_of(&store, parent).await;
        }
        let err = coordinator.check_child_budget(parent).await.err().unwrap();
        assert!(matches!(err, CoordError::TooManyChildren));
    }
}
