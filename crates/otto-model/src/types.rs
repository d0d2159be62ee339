// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Identifiers ──────────────────────────────────────────────────────────────

/// Opaque 128-bit Task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 128-bit Message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Conversation content ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One block of message content.
///
/// - `Text` – plain assistant/user text
/// - `ToolCall` – the assistant requests a tool invocation
/// - `ToolResult` – the outcome of a tool call, `id` matching the ToolCall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        tool_name: String,
        result: serde_json::Value,
        succeeded: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single conversation turn as submitted to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, blocks: vec![ContentBlock::text(text)] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, blocks: vec![ContentBlock::text(text)] }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, blocks: vec![ContentBlock::text(text)] }
    }

    /// A user-role turn carrying tool results back to the model.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self { role: Role::User, blocks }
    }

    /// The plain text of this message, if it is a single text block.
    pub fn as_text(&self) -> Option<&str> {
        match self.blocks.as_slice() {
            [ContentBlock::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// Approximate token count used for context budgeting.
    ///
    /// 4-chars-per-token heuristic over the serialized block content.
    pub fn approx_tokens(&self) -> usize {
        let chars: usize = self
            .blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::ToolCall { tool_name, args, .. } => {
                    tool_name.len() + args.to_string().len()
                }
                ContentBlock::ToolResult { result, .. } => result.to_string().len(),
            })
            .sum();
        (chars / 4).max(1)
    }
}

/// A tool made available to the model, described by a JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object
    pub input_schema: serde_json::Value,
}

/// Token usage from one provider call, accumulated per Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    /// Primary system prompt, always submitted as the top-level system field.
    pub system_prompt: String,
    /// Ordered conversation history.  System-role entries are folded to user
    /// turns by translators for providers that reject interleaved system
    /// messages.
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A single streamed delta from the model.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A text fragment
    Text(String),
    /// A tool-use fragment.  `index` keys parallel tool calls; `arguments`
    /// accumulates across deltas for the same index.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Usage counters; may arrive more than once per call (input counts at
    /// stream start, output counts at the end).
    Usage(Usage),
    /// The stream finished normally.
    Done,
}

/// The fully accumulated result of one provider call.
#[derive(Debug, Clone, Default)]
pub struct AssistantMessage {
    pub blocks: Vec<ContentBlock>,
    pub usage: Usage,
}

impl AssistantMessage {
    /// All tool calls requested in this message, in emission order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ContentBlock> {
        self.blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolCall { .. }))
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// Concatenation of all text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn task_id_round_trips_through_display() {
        let id = TaskId::new();
        assert_eq!(TaskId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn chat_message_user_is_single_text_block() {
        let m = ChatMessage::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn as_text_none_for_tool_blocks() {
        let m = ChatMessage::tool_results(vec![ContentBlock::ToolResult {
            id: "c1".into(),
            tool_name: "read_file".into(),
            result: serde_json::json!({"content": "x"}),
            succeeded: true,
        }]);
        assert!(m.as_text().is_none());
    }

    #[test]
    fn approx_tokens_divides_by_four_with_floor_one() {
        assert_eq!(ChatMessage::user("12345678").approx_tokens(), 2);
        assert_eq!(ChatMessage::user("hi").approx_tokens(), 1);
    }

    #[test]
    fn usage_add_accumulates_all_counters() {
        let mut u = Usage { input_tokens: 1, output_tokens: 2, cache_read_tokens: 3, cache_write_tokens: 4 };
        u.add(&Usage { input_tokens: 10, output_tokens: 20, cache_read_tokens: 30, cache_write_tokens: 40 });
        assert_eq!(u.input_tokens, 11);
        assert_eq!(u.output_tokens, 22);
        assert_eq!(u.cache_read_tokens, 33);
        assert_eq!(u.cache_write_tokens, 44);
    }

    #[test]
    fn assistant_message_text_joins_text_blocks_only() {
        let m = AssistantMessage {
            blocks: vec![
                ContentBlock::text("a"),
                ContentBlock::ToolCall {
                    id: "c1".into(),
                    tool_name: "t".into(),
                    args: serde_json::json!({}),
                },
                ContentBlock::text("b"),
            ],
            usage: Usage::default(),
        };
        assert_eq!(m.text(), "ab");
        assert!(m.has_tool_calls());
    }

    #[test]
    fn content_block_serializes_tagged() {
        let b = ContentBlock::ToolCall {
            id: "c1".into(),
            tool_name: "read_file".into(),
            args: serde_json::json!({"path": "/tmp/x"}),
        };
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"type\":\"tool_call\""), "{json}");
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
