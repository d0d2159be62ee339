// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! History → provider-wire translation.
//!
//! Translators are the only place provider-specific block names are allowed;
//! the engine deals exclusively in [`ChatMessage`]/[`ContentBlock`] terms.

use serde_json::{json, Value};

use crate::{ChatMessage, CompletionRequest, ContentBlock, Role, StreamDelta, Usage};

/// Builds the JSON body a provider expects from a [`CompletionRequest`].
pub trait WireTranslator: Send + Sync {
    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value;
}

/// Translator for the Anthropic Messages API.
///
/// Two invariants are upheld here:
/// - a `cache_control` breakpoint is attached to the last block of the
///   current user turn and of the previous user turn, and to the last tool
///   descriptor, so the prompt prefix is reused across turns;
/// - System-role history messages are folded into user turns (the API only
///   accepts the primary system prompt as a top-level field).
#[derive(Debug, Default)]
pub struct AnthropicTranslator;

impl WireTranslator for AnthropicTranslator {
    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let mut messages = build_messages(&req.messages);
        mark_user_turn_breakpoints(&mut messages);

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if !req.system_prompt.is_empty() {
            body["system"] = json!([{
                "type": "text",
                "text": req.system_prompt,
                "cache_control": { "type": "ephemeral" },
            }]);
        }
        if !req.tools.is_empty() {
            let last = req.tools.len() - 1;
            let tools: Vec<Value> = req
                .tools
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let mut v = json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    });
                    if i == last {
                        v["cache_control"] = json!({ "type": "ephemeral" });
                    }
                    v
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }
}

/// Convert the engine-side history into Anthropic conversation messages.
///
/// System turns fold to user role; Tool-role turns carry tool_result blocks
/// and are submitted as user role, which is what the API expects.
fn build_messages(history: &[ChatMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len());
    for m in history {
        let role = match m.role {
            Role::Assistant => "assistant",
            // Interleaved system messages are not accepted; fold to user.
            Role::System | Role::User | Role::Tool => "user",
        };
        let content: Vec<Value> = m
            .blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                ContentBlock::ToolCall { id, tool_name, args } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": tool_name,
                    "input": args,
                }),
                ContentBlock::ToolResult { id, result, succeeded, .. } => json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": result.to_string(),
                    "is_error": !succeeded,
                }),
            })
            .collect();
        out.push(json!({ "role": role, "content": content }));
    }
    out
}

/// Attach `cache_control` to the last block of the last two user-role turns.
///
/// Caching the previous user turn as well as the current one means the prefix
/// up to the *last* completed exchange stays warm while the model streams the
/// new turn.
fn mark_user_turn_breakpoints(messages: &mut [Value]) {
    let mut marked = 0;
    for msg in messages.iter_mut().rev() {
        if marked == 2 {
            break;
        }
        if msg["role"] != "user" {
            continue;
        }
        if let Some(blocks) = msg["content"].as_array_mut() {
            if let Some(last) = blocks.last_mut() {
                last["cache_control"] = json!({ "type": "ephemeral" });
                marked += 1;
            }
        }
    }
}

/// Parse one Anthropic SSE event into a [`StreamDelta`].
///
/// Unknown or irrelevant event types (pings, signature deltas) map to an
/// empty text delta, which accumulates to nothing downstream.
pub fn parse_anthropic_event(v: &Value) -> StreamDelta {
    match v["type"].as_str().unwrap_or("") {
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                StreamDelta::ToolCall {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                }
            } else {
                StreamDelta::Text(String::new())
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    StreamDelta::Text(delta["text"].as_str().unwrap_or("").to_string())
                }
                "input_json_delta" => StreamDelta::ToolCall {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                },
                _ => StreamDelta::Text(String::new()),
            }
        }
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                StreamDelta::Usage(Usage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                    output_tokens: 0,
                    cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
                    cache_write_tokens: usage["cache_creation_input_tokens"]
                        .as_u64()
                        .unwrap_or(0),
                })
            } else {
                StreamDelta::Text(String::new())
            }
        }
        "message_delta" => {
            if let Some(usage) = v.get("usage") {
                StreamDelta::Usage(Usage {
                    input_tokens: 0,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                })
            } else {
                StreamDelta::Text(String::new())
            }
        }
        "message_stop" => StreamDelta::Done,
        _ => StreamDelta::Text(String::new()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolDescriptor;

    fn req(messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: "test-model".into(),
            system_prompt: "be terse".into(),
            messages,
            tools: vec![],
            max_tokens: None,
            temperature: None,
        }
    }

    // ── Body shape ────────────────────────────────────────────────────────────

    #[test]
    fn system_prompt_is_top_level_cached_block() {
        let body = AnthropicTranslator.build_body(&req(vec![ChatMessage::user("hi")]), true);
        assert_eq!(body["system"][0]["text"], "be terse");
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn history_system_messages_fold_to_user_role() {
        let body = AnthropicTranslator.build_body(
            &req(vec![ChatMessage::system("note"), ChatMessage::user("hi")]),
            true,
        );
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "note");
    }

    #[test]
    fn current_and_previous_user_turns_carry_breakpoints() {
        let body = AnthropicTranslator.build_body(
            &req(vec![
                ChatMessage::user("turn 1"),
                ChatMessage::assistant("reply 1"),
                ChatMessage::user("turn 2"),
                ChatMessage::assistant("reply 2"),
                ChatMessage::user("turn 3"),
            ]),
            true,
        );
        let msgs = body["messages"].as_array().unwrap();
        // turn 3 (current) and turn 2 (previous) are marked; turn 1 is not.
        assert!(msgs[4]["content"][0].get("cache_control").is_some());
        assert!(msgs[2]["content"][0].get("cache_control").is_some());
        assert!(msgs[0]["content"][0].get("cache_control").is_none());
        // assistant turns never carry breakpoints
        assert!(msgs[1]["content"][0].get("cache_control").is_none());
    }

    #[test]
    fn last_tool_descriptor_carries_breakpoint() {
        let mut r = req(vec![ChatMessage::user("hi")]);
        r.tools = vec![
            ToolDescriptor {
                name: "a".into(),
                description: "first".into(),
                input_schema: json!({"type": "object"}),
            },
            ToolDescriptor {
                name: "b".into(),
                description: "second".into(),
                input_schema: json!({"type": "object"}),
            },
        ];
        let body = AnthropicTranslator.build_body(&r, true);
        let tools = body["tools"].as_array().unwrap();
        assert!(tools[0].get("cache_control").is_none());
        assert_eq!(tools[1]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn tool_call_block_becomes_tool_use() {
        let m = ChatMessage {
            role: Role::Assistant,
            blocks: vec![ContentBlock::ToolCall {
                id: "c1".into(),
                tool_name: "read_file".into(),
                args: json!({"path": "/tmp/x"}),
            }],
        };
        let body = AnthropicTranslator.build_body(&req(vec![m]), true);
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["id"], "c1");
        assert_eq!(block["name"], "read_file");
        assert_eq!(block["input"]["path"], "/tmp/x");
    }

    #[test]
    fn tool_result_block_becomes_user_tool_result() {
        let m = ChatMessage::tool_results(vec![ContentBlock::ToolResult {
            id: "c1".into(),
            tool_name: "read_file".into(),
            result: json!({"content": "hello"}),
            succeeded: false,
        }]);
        let body = AnthropicTranslator.build_body(&req(vec![m]), true);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        let block = &msg["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "c1");
        assert_eq!(block["is_error"], true);
    }

    // ── Event parsing ─────────────────────────────────────────────────────────

    #[test]
    fn text_delta_parses() {
        let d = parse_anthropic_event(&json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "world" }
        }));
        assert!(matches!(d, StreamDelta::Text(t) if t == "world"));
    }

    #[test]
    fn tool_use_start_parses_with_index() {
        let d = parse_anthropic_event(&json!({
            "type": "content_block_start",
            "index": 2,
            "content_block": { "type": "tool_use", "id": "toolu_01", "name": "shell" }
        }));
        match d {
            StreamDelta::ToolCall { index, id, name, arguments } => {
                assert_eq!(index, 2);
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "shell");
                assert!(arguments.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn input_json_delta_accumulates_arguments() {
        let d = parse_anthropic_event(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "input_json_delta", "partial_json": "{\"pa" }
        }));
        assert!(matches!(d, StreamDelta::ToolCall { arguments, .. } if arguments == "{\"pa"));
    }

    #[test]
    fn message_start_carries_input_and_cache_usage() {
        let d = parse_anthropic_event(&json!({
            "type": "message_start",
            "message": { "usage": {
                "input_tokens": 100,
                "cache_read_input_tokens": 80,
                "cache_creation_input_tokens": 20
            }}
        }));
        match d {
            StreamDelta::Usage(u) => {
                assert_eq!(u.input_tokens, 100);
                assert_eq!(u.cache_read_tokens, 80);
                assert_eq!(u.cache_write_tokens, 20);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn message_stop_is_done() {
        assert!(matches!(
            parse_anthropic_event(&json!({"type": "message_stop"})),
            StreamDelta::Done
        ));
    }

    #[test]
    fn unknown_event_is_empty_text() {
        assert!(matches!(
            parse_anthropic_event(&json!({"type": "ping"})),
            StreamDelta::Text(t) if t.is_empty()
        ));
    }
}
