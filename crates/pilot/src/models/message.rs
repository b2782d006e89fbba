use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::{ContentBlock, ToolResultBlock, ToolUse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Computer,
}

/// Message content is either a plain string or an ordered list of blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Message { role, content }
    }

    /// Create a message whose content is a plain string
    pub fn from_text<S: Into<String>>(role: Role, text: S) -> Self {
        Message::new(role, MessageContent::Text(text.into()))
    }

    /// Create a new, empty user message
    pub fn user() -> Self {
        Message::new(Role::User, MessageContent::default())
    }

    /// Create a new, empty assistant message
    pub fn assistant() -> Self {
        Message::new(Role::Assistant, MessageContent::default())
    }

    /// Add a block to the message, promoting plain string content to a text block first
    pub fn with_content(mut self, block: ContentBlock) -> Self {
        match &mut self.content {
            MessageContent::Blocks(blocks) => blocks.push(block),
            MessageContent::Text(text) => {
                let existing = ContentBlock::text(std::mem::take(text));
                self.content = MessageContent::Blocks(vec![existing, block]);
            }
        }
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentBlock::text(text))
    }

    pub fn with_image<S: Into<String>, T: Into<String>>(self, data: S, media_type: T) -> Self {
        self.with_content(ContentBlock::image(data, media_type))
    }

    pub fn with_tool_use<S: Into<String>, N: Into<String>>(
        self,
        id: S,
        name: N,
        input: Value,
    ) -> Self {
        self.with_content(ContentBlock::tool_use(id, name, input))
    }

    /// The content blocks of this message; plain string content has none
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }

    pub(crate) fn blocks_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        match &mut self.content {
            MessageContent::Blocks(blocks) => Some(blocks),
            MessageContent::Text(_) => None,
        }
    }

    /// All text in the message, joined by newlines
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.as_text())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.blocks()
            .iter()
            .filter_map(|block| block.as_tool_use())
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResultBlock> {
        self.blocks()
            .iter()
            .filter_map(|block| block.as_tool_result())
            .collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.blocks()
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::ToolResultContent;
    use serde_json::json;

    #[test]
    fn test_plain_string_content_round_trips() {
        let message = Message::from_text(Role::User, "hello");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let decoded: Message = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, message);
        assert!(decoded.blocks().is_empty());
        assert_eq!(decoded.text(), "hello");
    }

    #[test]
    fn test_with_content_promotes_plain_text() {
        let message = Message::from_text(Role::Assistant, "looking")
            .with_tool_use("toolu_1", "computer", json!({"action": "screenshot"}));

        assert_eq!(message.blocks().len(), 2);
        assert_eq!(message.blocks()[0], ContentBlock::text("looking"));
        assert!(message.has_tool_use());
    }

    #[test]
    fn test_tool_accessors() {
        let message = Message::assistant()
            .with_text("two actions")
            .with_tool_use("a", "computer", json!({}))
            .with_tool_use("b", "computer", json!({}));
        let ids: Vec<_> = message.tool_uses().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let results = Message::user().with_content(ContentBlock::tool_result(
            "a",
            vec![ToolResultContent::text("ok")],
            false,
        ));
        assert_eq!(results.tool_results().len(), 1);
        assert!(!results.has_tool_use());
    }

    #[test]
    fn test_text_joins_blocks() {
        let message = Message::assistant()
            .with_text("first")
            .with_image("abc", "image/png")
            .with_text("second");
        assert_eq!(message.text(), "first\nsecond");
    }
}
