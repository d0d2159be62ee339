// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use otto_model::{MessageId, TaskId, Usage};

use crate::types::{MessageRecord, TaskPhase, TaskRecord, TokenRecord};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The addressed record does not exist.  Distinguished from transport
    /// failures so callers can branch on it.
    #[error("not found: {0}")]
    NotFound(String),
    /// Anything the storage backend could not complete.
    #[error("storage: {0}")]
    Storage(String),
}

/// The repository — the only durable shared resource the engine touches.
///
/// Backends implement the compound operations atomically
/// (`set_desired_phase_with_children` in particular), so a multi-step
/// mutation either lands fully or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Tasks ────────────────────────────────────────────────────────────────

    async fn create_task(&self, task: TaskRecord) -> Result<(), StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    /// Replace the stored record; bumps `updated_at`.
    async fn update_task(&self, task: TaskRecord) -> Result<(), StoreError>;

    async fn list_children(&self, parent_id: TaskId) -> Result<Vec<TaskRecord>, StoreError>;

    /// Set the observed phase (and optional failure reason) of a Task.
    async fn set_phase(
        &self,
        id: TaskId,
        phase: TaskPhase,
        failure_reason: Option<String>,
    ) -> Result<(), StoreError>;

    async fn set_desired_phase(&self, id: TaskId, desired: TaskPhase) -> Result<(), StoreError>;

    /// Atomically set the desired phase on a Task and all its direct
    /// children.  Returns the affected child ids.
    async fn set_desired_phase_with_children(
        &self,
        id: TaskId,
        desired: TaskPhase,
    ) -> Result<Vec<TaskId>, StoreError>;

    /// Fold one provider call's usage into the Task's cumulative counters.
    async fn add_usage(&self, id: TaskId, usage: Usage) -> Result<(), StoreError>;

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Append-only; a message is never rewritten once `processed_at` is set.
    async fn append_message(&self, message: MessageRecord) -> Result<(), StoreError>;

    async fn get_message(&self, id: MessageId) -> Result<MessageRecord, StoreError>;

    /// All messages for a Task ordered by `(created_at, id)`.
    async fn list_messages(&self, task_id: TaskId) -> Result<Vec<MessageRecord>, StoreError>;

    /// Messages for a Task created strictly after `after`'s creation time,
    /// ordered ascending.  `after = None` returns the full history.
    async fn list_messages_after(
        &self,
        task_id: TaskId,
        after: Option<MessageId>,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn mark_processed(
        &self,
        id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Tokens (consumed by the auth collaborator; engine does not read) ─────

    async fn put_token(&self, token: TokenRecord) -> Result<(), StoreError>;

    async fn get_token(&self, name: &str) -> Result<TokenRecord, StoreError>;

    // ── Secrets ──────────────────────────────────────────────────────────────

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put_secret(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}
