//! Incremental decoding of the native protocol's server-sent events.
//!
//! Events are folded through a [`MessageAssembler`]; each open content block lives in a
//! [`BlockAccumulator`] until its `content_block_stop`, when it becomes an immutable
//! [`ContentBlock`].
use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::warn;

use crate::models::content::ContentBlock;
use crate::models::message::{Message, MessageContent, Role};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart { index: usize, block: Value },
    TextDelta { index: usize, text: String },
    InputJsonDelta { index: usize, partial_json: String },
    ContentBlockStop { index: usize },
    MessageDelta { stop_reason: Option<String> },
    MessageStop,
    Ping,
    Error { error_type: String, message: String },
}

/// Decode one server-sent event from its `event` name and `data` payload.
///
/// Returns `None` for events we do not understand; those are skipped.
pub fn parse_sse_event(event: &str, data: &str) -> Option<StreamEvent> {
    let data: Value = serde_json::from_str(data).ok()?;
    // vertex omits the event line, the payload type carries the same name
    let event_type = match event {
        "" | "message" => data["type"].as_str()?,
        named => named,
    };

    match event_type {
        "message_start" => Some(StreamEvent::MessageStart),
        "content_block_start" => Some(StreamEvent::ContentBlockStart {
            index: data["index"].as_u64()? as usize,
            block: data["content_block"].clone(),
        }),
        "content_block_delta" => {
            let index = data["index"].as_u64()? as usize;
            let delta = &data["delta"];
            match delta["type"].as_str()? {
                "text_delta" => Some(StreamEvent::TextDelta {
                    index,
                    text: delta["text"].as_str()?.to_string(),
                }),
                "input_json_delta" => Some(StreamEvent::InputJsonDelta {
                    index,
                    partial_json: delta["partial_json"].as_str()?.to_string(),
                }),
                _ => None,
            }
        }
        "content_block_stop" => Some(StreamEvent::ContentBlockStop {
            index: data["index"].as_u64()? as usize,
        }),
        "message_delta" => Some(StreamEvent::MessageDelta {
            stop_reason: data["delta"]["stop_reason"].as_str().map(str::to_string),
        }),
        "message_stop" => Some(StreamEvent::MessageStop),
        "ping" => Some(StreamEvent::Ping),
        "error" => Some(StreamEvent::Error {
            error_type: data["error"]["type"].as_str().unwrap_or("error").to_string(),
            message: data["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        }),
        _ => None,
    }
}

/// Decode tool input JSON, degrading to `{"raw": text}` when it is not a JSON object
pub fn decode_arguments(text: &str) -> Value {
    if text.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "raw": text }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

/// A content block under construction
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAccumulator {
    kind: BlockKind,
    partial_text: String,
    partial_arguments_json: String,
}

impl BlockAccumulator {
    /// Start accumulating from a `content_block_start` payload
    pub fn start(block: &Value) -> Option<Self> {
        let kind = match block["type"].as_str()? {
            "text" => BlockKind::Text,
            "tool_use" => BlockKind::ToolUse {
                id: block["id"].as_str()?.to_string(),
                name: block["name"].as_str()?.to_string(),
            },
            _ => return None,
        };
        Some(BlockAccumulator {
            kind,
            partial_text: block["text"].as_str().unwrap_or_default().to_string(),
            partial_arguments_json: String::new(),
        })
    }

    pub fn push_text(&mut self, text: &str) {
        self.partial_text.push_str(text);
    }

    pub fn push_json(&mut self, partial_json: &str) {
        self.partial_arguments_json.push_str(partial_json);
    }

    pub fn is_text(&self) -> bool {
        self.kind == BlockKind::Text
    }

    pub fn finish(self) -> ContentBlock {
        match self.kind {
            BlockKind::Text => ContentBlock::text(self.partial_text),
            BlockKind::ToolUse { id, name } => {
                ContentBlock::tool_use(id, name, decode_arguments(&self.partial_arguments_json))
            }
        }
    }
}

/// Folds stream events into one assistant message
#[derive(Debug, Default)]
pub struct MessageAssembler {
    open: BTreeMap<usize, BlockAccumulator>,
    finished: BTreeMap<usize, ContentBlock>,
    stopped: bool,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event, returning any text that should be shown to the user now
    pub fn apply(&mut self, event: StreamEvent) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        match event {
            StreamEvent::ContentBlockStart { index, block } => {
                match BlockAccumulator::start(&block) {
                    Some(accumulator) => {
                        if !accumulator.partial_text.is_empty() {
                            chunks.push(accumulator.partial_text.clone());
                        }
                        self.open.insert(index, accumulator);
                    }
                    None => warn!("Skipping unsupported content block: {}", block["type"]),
                }
            }
            StreamEvent::TextDelta { index, text } => {
                if let Some(accumulator) = self.open.get_mut(&index) {
                    accumulator.push_text(&text);
                    chunks.push(text);
                }
            }
            StreamEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(accumulator) = self.open.get_mut(&index) {
                    accumulator.push_json(&partial_json);
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(accumulator) = self.open.remove(&index) {
                    if accumulator.is_text() {
                        chunks.push("\n".to_string());
                    }
                    self.finished.insert(index, accumulator.finish());
                }
            }
            StreamEvent::MessageStop => self.stopped = true,
            StreamEvent::Error {
                error_type,
                message,
            } => return Err(anyhow!("Stream error ({}): {}", error_type, message)),
            StreamEvent::MessageStart | StreamEvent::MessageDelta { .. } | StreamEvent::Ping => {}
        }
        Ok(chunks)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Materialize the assistant message; blocks never closed are finalized as they stand
    pub fn finish(mut self) -> Message {
        for (index, accumulator) in std::mem::take(&mut self.open) {
            self.finished.insert(index, accumulator.finish());
        }
        Message::new(
            Role::Assistant,
            MessageContent::Blocks(self.finished.into_values().collect()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(raw: &[(&str, &str)]) -> Vec<StreamEvent> {
        raw.iter()
            .filter_map(|(event, data)| parse_sse_event(event, data))
            .collect()
    }

    #[test]
    fn test_parse_text_delta() {
        assert_eq!(
            parse_sse_event(
                "content_block_delta",
                r#"{"index": 0, "delta": {"type": "text_delta", "text": "Hello"}}"#
            ),
            Some(StreamEvent::TextDelta {
                index: 0,
                text: "Hello".to_string()
            })
        );
    }

    #[test]
    fn test_parse_without_event_line() {
        assert_eq!(
            parse_sse_event("message", r#"{"type": "message_stop"}"#),
            Some(StreamEvent::MessageStop)
        );
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        assert_eq!(parse_sse_event("unknown_event", "{}"), None);
        assert_eq!(parse_sse_event("ping", ""), None);
        assert_eq!(parse_sse_event("content_block_stop", "{not json"), None);
        assert_eq!(parse_sse_event("message", "{}"), None);
    }

    #[test]
    fn test_assemble_text_and_tool_use() {
        let mut assembler = MessageAssembler::new();
        let mut chunks = Vec::new();
        for event in events(&[
            ("message_start", r#"{"message": {"id": "msg_1"}}"#),
            ("content_block_start", r#"{"index": 0, "content_block": {"type": "text", "text": ""}}"#),
            ("content_block_delta", r#"{"index": 0, "delta": {"type": "text_delta", "text": "Taking "}}"#),
            ("content_block_delta", r#"{"index": 0, "delta": {"type": "text_delta", "text": "a look"}}"#),
            ("content_block_stop", r#"{"index": 0}"#),
            (
                "content_block_start",
                r#"{"index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "computer", "input": {}}}"#,
            ),
            (
                "content_block_delta",
                r#"{"index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"action\": "}}"#,
            ),
            (
                "content_block_delta",
                r#"{"index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"screenshot\"}"}}"#,
            ),
            ("content_block_stop", r#"{"index": 1}"#),
            ("message_stop", "{}"),
        ]) {
            chunks.extend(assembler.apply(event).unwrap());
        }

        assert_eq!(chunks, vec!["Taking ", "a look", "\n"]);
        assert!(assembler.is_stopped());

        let message = assembler.finish();
        assert_eq!(message.text(), "Taking a look");
        let tool_use = message.tool_uses()[0].clone();
        assert_eq!(tool_use.id, "toolu_1");
        assert_eq!(tool_use.input, json!({"action": "screenshot"}));
    }

    #[test]
    fn test_tool_input_degrades_to_raw() {
        let mut accumulator = BlockAccumulator::start(&json!({
            "type": "tool_use", "id": "t", "name": "computer"
        }))
        .unwrap();
        accumulator.push_json("{\"action\": ");
        let block = accumulator.finish();
        assert_eq!(
            block.as_tool_use().unwrap().input,
            json!({"raw": "{\"action\": "})
        );
    }

    #[test]
    fn test_empty_tool_input_is_empty_object() {
        let accumulator = BlockAccumulator::start(&json!({
            "type": "tool_use", "id": "t", "name": "computer"
        }))
        .unwrap();
        assert_eq!(accumulator.finish().as_tool_use().unwrap().input, json!({}));
    }

    #[test]
    fn test_error_event_fails() {
        let mut assembler = MessageAssembler::new();
        let event = parse_sse_event(
            "error",
            r#"{"error": {"type": "overloaded_error", "message": "Overloaded"}}"#,
        )
        .unwrap();
        let err = assembler.apply(event).unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
