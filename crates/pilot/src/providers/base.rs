use anyhow::Result;
use futures::stream::BoxStream;

use crate::models::message::Message;
use crate::models::tool::ToolSchema;

/// One item produced by a provider while answering a turn
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// Incremental text, only produced by streaming providers
    Chunk(String),
    /// The finished assistant message for the turn
    Message(Message),
}

/// Everything a provider needs to produce one assistant turn
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub model: &'a str,
    pub system: &'a str,
    pub tools: &'a [ToolSchema],
    pub max_tokens: u32,
}

pub type CompletionStream<'a> = BoxStream<'a, Result<CompletionEvent>>;

/// Base trait for model backends that can drive the sampling loop
pub trait Provider: Send + Sync {
    /// Produce one assistant turn as a finite stream of events.
    ///
    /// The stream ends after the first [`CompletionEvent::Message`]; anything before it is
    /// incremental text for display.
    fn create_completion<'a>(&'a self, request: CompletionRequest<'a>) -> CompletionStream<'a>;

    fn supports_vision(&self) -> bool;

    fn supports_tool_calling(&self) -> bool;

    /// The model that will answer the next request
    fn model_name(&self) -> String;
}
