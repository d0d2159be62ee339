// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use otto_model::{MessageId, TaskId};

/// Events published by the engine.  Closed set; the bus dispatches by kind
/// tag, never by string topic.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A message was persisted on a Task.
    Message { task_id: TaskId, message_id: MessageId },
    /// Generic phase change on a Task.
    Task { task_id: TaskId },
    /// A Task transitioned to Suspended.
    TaskSuspended { task_id: TaskId },
    /// A Task reached Completed.
    TaskCompleted { task_id: TaskId },
    /// A tool invocation is starting.
    ToolCall {
        task_id: TaskId,
        tool_name: String,
        input: serde_json::Value,
    },
    /// A tool invocation finished.
    ToolResult {
        task_id: TaskId,
        tool_name: String,
        input: serde_json::Value,
        output: serde_json::Value,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::Task { .. } => EventKind::Task,
            Self::TaskSuspended { .. } => EventKind::TaskSuspended,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::ToolCall { .. } => EventKind::ToolCall,
            Self::ToolResult { .. } => EventKind::ToolResult,
        }
    }

    /// The Task every event variant is attached to.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Message { task_id, .. }
            | Self::Task { task_id }
            | Self::TaskSuspended { task_id }
            | Self::TaskCompleted { task_id }
            | Self::ToolCall { task_id, .. }
            | Self::ToolResult { task_id, .. } => *task_id,
        }
    }

    /// Message id for Message events, `None` otherwise.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Message { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

/// Fieldless discriminant of [`EngineEvent`], used for subscription dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Task,
    TaskSuspended,
    TaskCompleted,
    ToolCall,
    ToolResult,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Message,
        EventKind::Task,
        EventKind::TaskSuspended,
        EventKind::TaskCompleted,
        EventKind::ToolCall,
        EventKind::ToolResult,
    ];
}
