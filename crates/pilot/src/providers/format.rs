//! Translation between the canonical message model and the generic chat-completion schema.
//!
//! Everything here is pure. The bridged provider uses these functions to talk to host
//! models that only understand role/content chat messages, and recovers tool calls from
//! their plain text replies with [`parse_textual_tool_calls`].
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::content::{ContentBlock, ToolResultContent};
use crate::models::message::{Message, MessageContent, Role};
use crate::models::tool::ToolSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Either a JSON-encoded string or an already decoded object
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ChatToolCall {
    pub fn function<N: Into<String>>(id: Option<String>, name: N, arguments: Value) -> Self {
        ChatToolCall {
            id,
            kind: function_kind(),
            function: FunctionCall {
                name: Some(name.into()),
                arguments,
            },
        }
    }
}

/// One message in the generic chat schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChatToolCall>,
}

impl ChatMessage {
    pub fn text<S: Into<String>>(role: Role, text: S) -> Self {
        ChatMessage {
            role,
            content: Some(ChatContent::Text(text.into())),
            tool_calls: Vec::new(),
        }
    }

    /// All text carried by the message, parts joined by newlines
    pub fn text_content(&self) -> String {
        match &self.content {
            Some(ChatContent::Text(text)) => text.clone(),
            Some(ChatContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| match part {
                    ChatContentPart::Text { text } => Some(text.as_str()),
                    ChatContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        }
    }
}

/// Convert canonical history into generic chat messages, prepending the system prompt.
///
/// Images inside tool results are not carried over; only their text is flattened into a
/// `Tool result: ` item.
pub fn to_generic_chat(messages: &[Message], system: &str) -> Vec<ChatMessage> {
    let mut chat_messages = Vec::with_capacity(messages.len() + 1);

    if !system.is_empty() {
        chat_messages.push(ChatMessage::text(Role::System, system));
    }

    for message in messages {
        let blocks = match &message.content {
            MessageContent::Text(text) => {
                chat_messages.push(ChatMessage::text(message.role, text.clone()));
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text(text) => parts.push(ChatContentPart::Text {
                    text: text.text.clone(),
                }),
                ContentBlock::Image(image) => parts.push(ChatContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_uri(),
                    },
                }),
                ContentBlock::ToolUse(tool_use) => tool_calls.push(ChatToolCall::function(
                    Some(tool_use.id.clone()),
                    tool_use.name.clone(),
                    Value::String(tool_use.input.to_string()),
                )),
                ContentBlock::ToolResult(result) => {
                    for item in &result.content {
                        if let ToolResultContent::Text(text) = item {
                            parts.push(ChatContentPart::Text {
                                text: format!("Tool result: {}", text.text),
                            });
                        }
                    }
                }
            }
        }

        if parts.is_empty() && tool_calls.is_empty() {
            continue;
        }

        let content = match parts.as_slice() {
            [] => None,
            [ChatContentPart::Text { text }] => Some(ChatContent::Text(text.clone())),
            _ => Some(ChatContent::Parts(parts)),
        };
        chat_messages.push(ChatMessage {
            role: message.role,
            content,
            tool_calls,
        });
    }

    chat_messages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ToolUse,
    Stop,
}

/// An assistant reply rebuilt from the generic chat schema
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedReply {
    pub id: String,
    pub message: Message,
    pub stop_reason: StopReason,
}

/// Build one canonical assistant message from a generic chat reply
pub fn from_generic_chat(text: &str, tool_calls: &[ChatToolCall], model: &str) -> ConvertedReply {
    let mut message = Message::assistant();
    let mut next_index = 0;

    if !text.is_empty() {
        message = message.with_text(text);
        next_index += 1;
    }

    for call in tool_calls {
        let input = match &call.function.arguments {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) if value.is_object() => value,
                _ => json!({ "raw": raw }),
            },
            Value::Null => json!({}),
            other => other.clone(),
        };
        let id = call
            .id
            .clone()
            .unwrap_or_else(|| format!("tool_{}", next_index));
        let name = call
            .function
            .name
            .clone()
            .unwrap_or_else(|| "computer".to_string());
        message = message.with_tool_use(id, name, input);
        next_index += 1;
    }

    ConvertedReply {
        id: format!("msg_{}", model.chars().take(8).collect::<String>()),
        message,
        stop_reason: if tool_calls.is_empty() {
            StopReason::Stop
        } else {
            StopReason::ToolUse
        },
    }
}

lazy_static! {
    static ref TEXTUAL_CALL: Regex = Regex::new(r"computer\.(\w+)\((.*?)\)").unwrap();
}

/// Recover `computer.<action>(...)` pseudo tool calls from free-form text.
///
/// Two integer arguments become a `coordinate`, a single double-quoted argument becomes
/// `text`, and any other argument shape is dropped while the call itself is kept.
pub fn parse_textual_tool_calls(response_text: &str) -> Option<Vec<ChatToolCall>> {
    let calls: Vec<ChatToolCall> = TEXTUAL_CALL
        .captures_iter(response_text)
        .map(|captures| {
            let action = &captures[1];
            let params = captures[2].trim();
            let mut arguments = json!({ "action": action });

            if let Some(coordinate) = parse_coordinate(params) {
                arguments["coordinate"] = json!(coordinate);
            } else if let Some(text) = parse_quoted(params) {
                arguments["text"] = json!(text);
            }

            ChatToolCall::function(None, "computer", Value::String(arguments.to_string()))
        })
        .collect();

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Write a tool call back out in the `computer.<action>(...)` form host models are taught
pub fn render_textual_tool_call(call: &ChatToolCall) -> String {
    let arguments = match &call.function.arguments {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    };
    let name = call.function.name.as_deref().unwrap_or("computer");

    let params = match (
        arguments.get("coordinate").and_then(Value::as_array),
        arguments.get("text").and_then(Value::as_str),
    ) {
        (Some(xy), _) if xy.len() == 2 => format!("{}, {}", xy[0], xy[1]),
        (_, Some(text)) => format!("\"{}\"", text),
        _ => String::new(),
    };

    match arguments.get("action").and_then(Value::as_str) {
        Some(action) => format!("{}.{}({})", name, action, params),
        None => format!("{}({})", name, params),
    }
}

fn parse_coordinate(params: &str) -> Option<[i64; 2]> {
    let (x, y) = params.split_once(',')?;
    let (x, y) = (x.trim(), y.trim());
    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !is_digits(x) || !is_digits(y) {
        return None;
    }
    Some([x.parse().ok()?, y.parse().ok()?])
}

fn parse_quoted(params: &str) -> Option<&str> {
    params
        .strip_prefix('"')?
        .strip_suffix('"')
        .filter(|inner| !inner.contains('"'))
}

/// Describe a tool as a generic chat function definition
pub fn function_schema(tool: &ToolSchema) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

/// Instructions appended to the system prompt for host models without a native tool manifest
pub fn textual_tool_guide(tools: &[ToolSchema]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let functions: Vec<Value> = tools.iter().map(function_schema).collect();
    let functions = serde_json::to_string_pretty(&functions).unwrap_or_default();
    indoc::formatdoc! {r#"
            <TOOLS>
            You can act on the computer with these functions:
            {}

            To call one, write it on its own line as computer.<action>(<arguments>), for example:
            computer.screenshot()
            computer.left_click(100, 200)
            computer.mouse_move(640, 400)
            computer.type("hello world")
            computer.key("Return")
            Coordinates are two integers in screen pixels. Text goes in double quotes.
            After each call, wait for the tool result before continuing.
            </TOOLS>"#,
        functions
    }
}
