use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::providers::base::{CompletionEvent, CompletionRequest, CompletionStream, Provider};

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The histories this provider has been called with, in order
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        self.requests.clone()
    }
}

impl Provider for MockProvider {
    fn create_completion<'a>(&'a self, request: CompletionRequest<'a>) -> CompletionStream<'a> {
        self.requests.lock().unwrap().push(request.messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        let message = if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Message::assistant().with_text("")
        } else {
            responses.remove(0)
        };
        let events: Vec<Result<CompletionEvent>> = vec![
            Ok(CompletionEvent::Chunk(message.text())),
            Ok(CompletionEvent::Message(message)),
        ];
        stream::iter(events).boxed()
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn model_name(&self) -> String {
        "mock".to_string()
    }
}
