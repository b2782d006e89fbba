use thiserror::Error;

use crate::models::message::Role;

/// Violations of the tool_use / tool_result pairing rules in a conversation history.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("tool_result references unknown tool_use id {0}")]
    OrphanedToolResult(String),

    #[error("tool_use {0} already has a tool_result")]
    DuplicateToolResult(String),

    #[error("tool_result for {found} arrived before the result for {expected}")]
    OutOfOrderToolResult { expected: String, found: String },

    #[error("tool_use id {0} is used more than once")]
    DuplicateToolUseId(String),

    #[error("{role:?} messages cannot carry {block} blocks")]
    MisplacedBlock { role: Role, block: &'static str },

    #[error("assistant turn started while tool uses are unresolved: {0:?}")]
    UnresolvedToolUses(Vec<String>),
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Tool unavailable: {0}")]
    Unavailable(String),
}

pub type ToolCallResult<T> = Result<T, ToolError>;
