//! Tools the model can invoke, and the collection that dispatches to them.
use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ToolCallResult;
use crate::models::tool::{ToolResult, ToolSchema};

pub mod collection;
pub mod computer;

pub use collection::ToolCollection;
pub use computer::ComputerTool;

/// Core trait for anything the model can act through
#[async_trait]
pub trait Tool: Send + Sync {
    /// The manifest entry describing this tool to providers
    fn schema(&self) -> ToolSchema;

    fn name(&self) -> String {
        self.schema().name
    }

    /// Execute the tool with the input the model supplied
    async fn call(&self, input: Value) -> ToolCallResult<ToolResult>;
}
