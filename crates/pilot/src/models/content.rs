use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

/// Where the bytes of an image come from. Only inline base64 data is supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub source: ImageSource,
}

impl ImageBlock {
    pub fn media_type(&self) -> &str {
        match &self.source {
            ImageSource::Base64 { media_type, .. } => media_type,
        }
    }

    pub fn data(&self) -> &str {
        match &self.source {
            ImageSource::Base64 { data, .. } => data,
        }
    }

    /// Render the image as a `data:` URI, the form chat-completion APIs expect
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type(), self.data())
    }
}

/// A model-issued request to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Content allowed inside a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text(TextBlock),
    Image(ImageBlock),
}

impl ToolResultContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolResultContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ToolResultContent::Image(_))
    }
}

/// The outcome of executing a [`ToolUse`], correlated through `tool_use_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_count(&self) -> usize {
        self.content.iter().filter(|c| c.is_image()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// A typed unit of message content
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    ToolUse(ToolUse),
    ToolResult(ToolResultBlock),
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text(TextBlock { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, media_type: T) -> Self {
        ContentBlock::Image(ImageBlock {
            source: ImageSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
        })
    }

    pub fn tool_use<S: Into<String>, N: Into<String>>(id: S, name: N, input: Value) -> Self {
        ContentBlock::ToolUse(ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn tool_result<S: Into<String>>(
        tool_use_id: S,
        content: Vec<ToolResultContent>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        })
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            ContentBlock::ToolUse(tool_use) => Some(tool_use),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultBlock> {
        match self {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::Image(_) => "image",
            ContentBlock::ToolUse(_) => "tool_use",
            ContentBlock::ToolResult(_) => "tool_result",
        }
    }
}

impl ToolResultContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ToolResultContent::Text(TextBlock { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, media_type: T) -> Self {
        ToolResultContent::Image(ImageBlock {
            source: ImageSource::Base64 {
                media_type: media_type.into(),
                data: data.into(),
            },
        })
    }
}
