use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::Tool;
use crate::models::tool::{ToolResult, ToolSchema};

/// An ordered registry of tools with a dispatch entry point that never fails
#[derive(Default)]
pub struct ToolCollection {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Box<dyn Tool>) -> Self {
        self.add(tool);
        self
    }

    /// Register a tool; a tool with the same name replaces the earlier one in place
    pub fn add(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name();
        match self.tools.iter().position(|t| t.name() == name) {
            Some(index) => self.tools[index] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The tool manifest, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema()).collect()
    }

    /// Run a tool by name. Unknown tools, tool errors and panics all become `ToolResult::error`.
    pub async fn run(&self, name: &str, input: Value) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
            warn!("Model requested unknown tool {}", name);
            return ToolResult::error(format!("Tool {} is invalid", name));
        };

        debug!(tool = name, %input, "Running tool");
        match AssertUnwindSafe(tool.call(input)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Tool {} failed: {}", name, e);
                ToolResult::error(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Tool {} panicked: {}", name, message);
                ToolResult::error(format!("Tool {} panicked: {}", name, message))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ToolCallResult, ToolError};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(
                "echo",
                "Echoes back the input",
                json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]}),
            )
        }

        async fn call(&self, input: Value) -> ToolCallResult<ToolResult> {
            match input.get("message").and_then(|m| m.as_str()) {
                Some("panic") => panic!("echo exploded"),
                Some(message) => Ok(ToolResult::output(message)),
                None => Err(ToolError::InvalidParameters("missing message".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let tools = ToolCollection::new().with_tool(Box::new(EchoTool));
        let result = tools.run("echo", json!({"message": "hi"})).await;
        assert_eq!(result, ToolResult::output("hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported() {
        let tools = ToolCollection::new();
        let result = tools.run("bash", json!({})).await;
        assert_eq!(result.error.as_deref(), Some("Tool bash is invalid"));
    }

    #[tokio::test]
    async fn test_tool_errors_become_results() {
        let tools = ToolCollection::new().with_tool(Box::new(EchoTool));
        let result = tools.run("echo", json!({})).await;
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("missing message"));
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let tools = ToolCollection::new().with_tool(Box::new(EchoTool));
        let result = tools.run("echo", json!({"message": "panic"})).await;
        assert!(result.error.unwrap().contains("echo exploded"));
    }

    #[test]
    fn test_schemas_keep_registration_order_and_replace_duplicates() {
        let mut tools = ToolCollection::new().with_tool(Box::new(EchoTool));
        tools.add(Box::new(EchoTool));
        let names: Vec<String> = tools.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo"]);
    }
}
