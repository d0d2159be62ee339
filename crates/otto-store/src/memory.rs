// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use otto_model::{MessageId, TaskId, Usage};

use crate::store::{Store, StoreError};
use crate::types::{MessageRecord, TaskPhase, TaskRecord, TokenRecord};

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, TaskRecord>,
    // Append order within a task is preserved; queries re-sort by
    // (created_at, id) to match the documented ordering.
    messages: Vec<MessageRecord>,
    tokens: HashMap<String, TokenRecord>,
    secrets: HashMap<String, Vec<u8>>,
}

/// In-memory reference implementation of [`Store`].
///
/// One mutex over the whole state: every trait method is a single critical
/// section, which is what makes the compound operations atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(what.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(parent) = task.parent_id {
            if !inner.tasks.contains_key(&parent) {
                return Err(not_found(format!("parent task {parent}")));
            }
        }
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.tasks.get(&id).cloned().ok_or_else(|| not_found(format!("task {id}")))
    }

    async fn update_task(&self, mut task: TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tasks.contains_key(&task.id) {
            return Err(not_found(format!("task {}", task.id)));
        }
        task.updated_at = Utc::now();
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn list_children(&self, parent_id: TaskId) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut children: Vec<TaskRecord> = inner
            .tasks
            .values()
            .filter(|t| t.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|t| (t.created_at, t.id));
        Ok(children)
    }

    async fn set_phase(
        &self,
        id: TaskId,
        phase: TaskPhase,
        failure_reason: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or_else(|| not_found(format!("task {id}")))?;
        task.phase = phase;
        if failure_reason.is_some() {
            task.failure_reason = failure_reason;
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_desired_phase(&self, id: TaskId, desired: TaskPhase) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or_else(|| not_found(format!("task {id}")))?;
        task.desired_phase = desired;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_desired_phase_with_children(
        &self,
        id: TaskId,
        desired: TaskPhase,
    ) -> Result<Vec<TaskId>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tasks.contains_key(&id) {
            return Err(not_found(format!("task {id}")));
        }
        let now = Utc::now();
        let mut children = Vec::new();
        for task in inner.tasks.values_mut() {
            if task.id == id {
                task.desired_phase = desired;
                task.updated_at = now;
            } else if task.parent_id == Some(id) && !task.phase.is_terminal() {
                task.desired_phase = desired;
                task.updated_at = now;
                children.push(task.id);
            }
        }
        children.sort();
        Ok(children)
    }

    async fn add_usage(&self, id: TaskId, usage: Usage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner.tasks.get_mut(&id).ok_or_else(|| not_found(format!("task {id}")))?;
        task.usage.add(&usage);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn append_message(&self, message: MessageRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tasks.contains_key(&message.task_id) {
            return Err(not_found(format!("task {}", message.task_id)));
        }
        inner.messages.push(message);
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<MessageRecord, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| not_found(format!("message {id}")))
    }

    async fn list_messages(&self, task_id: TaskId) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|m| m.task_id == task_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.created_at, m.id));
        Ok(out)
    }

    async fn list_messages_after(
        &self,
        task_id: TaskId,
        after: Option<MessageId>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let cutoff: Option<DateTime<Utc>> = match after {
            Some(id) => Some(self.get_message(id).await?.created_at),
            None => None,
        };
        let mut out = self.list_messages(task_id).await?;
        if let Some(cutoff) = cutoff {
            out.retain(|m| m.created_at > cutoff);
        }
        Ok(out)
    }

    async fn mark_processed(&self, id: MessageId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let msg = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| not_found(format!("message {id}")))?;
        if msg.processed_at.is_none() {
            msg.processed_at = Some(at);
        }
        Ok(())
    }

    async fn put_token(&self, token: TokenRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens.insert(token.name.clone(), token);
        Ok(())
    }

    async fn get_token(&self, name: &str) -> Result<TokenRecord, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.tokens.get(name).cloned().ok_or_else(|| not_found(format!("token {name}")))
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.secrets.get(key).cloned())
    }

    async fn put_secret(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.secrets.insert(key.to_string(), value);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
