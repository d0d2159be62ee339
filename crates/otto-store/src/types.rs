// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use otto_model::{ContentBlock, MessageId, Role, TaskId, Usage};

/// Observed lifecycle phase of a Task.
///
/// Phase only changes through the driver's state machine; external actors
/// express intent through `desired_phase` and the driver converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    AwaitingInput,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingInput => "awaiting_input",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversational work session bound to a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    /// Name of the agent configuration driving this Task.
    pub agent: String,
    pub parent_id: Option<TaskId>,
    /// Filesystem root the Task's tools may touch.
    pub project_dir: PathBuf,
    pub phase: TaskPhase,
    /// Target phase set by external actors; the driver converges to it.
    pub desired_phase: TaskPhase,
    /// Cumulative token usage across all provider calls.
    pub usage: Usage,
    /// Set when the Task entered `Failed`.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(agent: impl Into<String>, project_dir: PathBuf, parent_id: Option<TaskId>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            agent: agent.into(),
            parent_id,
            project_dir,
            phase: TaskPhase::AwaitingInput,
            desired_phase: TaskPhase::AwaitingInput,
            usage: Usage::default(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A time-ordered record attached to a Task.
///
/// `processed_at` is set once the driver has incorporated the message into a
/// model call (or the message was produced by the driver itself); messages
/// with a non-null `processed_at` are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub task_id: TaskId,
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
    /// Usage of the provider call that produced this message (assistant
    /// messages only; zero elsewhere).
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn new(task_id: TaskId, role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            id: MessageId::new(),
            task_id,
            role,
            blocks,
            usage: Usage::default(),
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn user(task_id: TaskId, text: impl Into<String>) -> Self {
        Self::new(task_id, Role::User, vec![ContentBlock::text(text)])
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Plain text, when the record is a single text block.
    pub fn as_text(&self) -> Option<&str> {
        match self.blocks.as_slice() {
            [ContentBlock::Text { text }] => Some(text),
            _ => None,
        }
    }
}

/// Auth token record.  The engine never reads these; they are part of the
/// repository contract consumed by the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Unique token name.
    pub name: String,
    /// Hash of the secret; the plaintext is never stored.
    pub hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_awaiting_input() {
        let t = TaskRecord::new("default", PathBuf::from("/tmp"), None);
        assert_eq!(t.phase, TaskPhase::AwaitingInput);
        assert_eq!(t.desired_phase, TaskPhase::AwaitingInput);
        assert!(t.parent_id.is_none());
        assert!(!t.phase.is_terminal());
    }

    #[test]
    fn terminal_phases() {
        assert!(TaskPhase::Completed.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
        assert!(!TaskPhase::Running.is_terminal());
        assert!(!TaskPhase::Suspended.is_terminal());
    }

    #[test]
    fn user_message_is_single_text_block() {
        let t = TaskRecord::new("default", PathBuf::from("/tmp"), None);
        let m = MessageRecord::user(t.id, "hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
        assert!(m.processed_at.is_none());
    }
}
