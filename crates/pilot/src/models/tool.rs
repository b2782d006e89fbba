use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The manifest entry a tool hands to providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the input the tool accepts
    pub input_schema: Value,
    /// A provider-native definition, sent verbatim instead of the schema when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<Value>,
}

impl ToolSchema {
    /// Create a new tool schema with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolSchema {
            name: name.into(),
            description: description.into(),
            input_schema,
            native: None,
        }
    }

    pub fn with_native(mut self, native: Value) -> Self {
        self.native = Some(native);
        self
    }
}

/// The uniform outcome of one tool invocation.
///
/// `output` and `error` are the two primary channels; `base64_image` may accompany either
/// and `system` is a contextual hint prefixed onto whichever channel is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ToolResult {
    pub fn output<S: Into<String>>(output: S) -> Self {
        ToolResult {
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn error<S: Into<String>>(error: S) -> Self {
        ToolResult {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_image<S: Into<String>>(mut self, base64_image: S) -> Self {
        self.base64_image = Some(base64_image.into());
        self
    }

    pub fn with_system<S: Into<String>>(mut self, system: S) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
