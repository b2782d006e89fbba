use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, warn};

use super::base::{CompletionEvent, CompletionRequest, CompletionStream, Provider};
use super::format::{from_generic_chat, parse_textual_tool_calls, textual_tool_guide, to_generic_chat};
use super::host::HostModel;
use crate::models::message::{Message, Role};

pub const NO_RESPONSE_TEXT: &str = "I apologize, but I didn't generate a response.";

/// Bridges an arbitrary host model into the loop through the generic chat schema.
///
/// Host models receive the tool manifest as text and answer with pseudo calls such as
/// `computer.left_click(10, 20)`, which are parsed back into tool uses. Failures never
/// escape: they become an assistant reply reading `Error: ...`.
pub struct CustomProvider {
    host: Arc<dyn HostModel>,
    warnings: Vec<String>,
}

impl CustomProvider {
    /// Wrap a host model, loading it first if needed
    pub async fn new(host: Arc<dyn HostModel>) -> Result<Self> {
        if !host.is_loaded() {
            host.load().await?;
        }

        let model = host.settings().model;
        let mut warnings = Vec::new();
        if !host.supports_vision() {
            warnings.push(format!(
                "Model {} does not support vision. OS mode requires a vision-capable model, so screenshots will not be understood.",
                model
            ));
        }
        if !host.supports_functions() {
            warnings.push(format!(
                "Model {} may not support tool calling. OS mode will attempt to work with text-based function calling.",
                model
            ));
        }
        for warning in &warnings {
            warn!("{}", warning);
        }

        Ok(Self { host, warnings })
    }

    /// Capabilities the host lacks, as human-readable warnings
    pub fn capability_warnings(&self) -> &[String] {
        &self.warnings
    }

    async fn complete(&self, request: &CompletionRequest<'_>, model: &str) -> Result<Message> {
        let guide = textual_tool_guide(request.tools);
        let system = match (request.system.is_empty(), guide.is_empty()) {
            (_, true) => request.system.to_string(),
            (true, false) => guide,
            (false, false) => format!("{}\n\n{}", request.system, guide),
        };

        let chat_messages = to_generic_chat(request.messages, &system);
        debug!(model, messages = chat_messages.len(), "Running host model");

        let mut fragments = self.host.run(&chat_messages).await?;
        let mut reply = None;
        while let Some(fragment) = fragments.try_next().await? {
            if fragment.role == Role::Assistant {
                reply = Some(fragment.content);
            }
        }

        let converted = match reply {
            Some(text) => {
                let mut tool_calls = parse_textual_tool_calls(&text).unwrap_or_default();
                // ids continue after every tool use already in the conversation
                let issued: usize = request.messages.iter().map(|m| m.tool_uses().len()).sum();
                for (index, call) in tool_calls.iter_mut().enumerate() {
                    call.id = Some(format!("tool_{}", issued + index + 1));
                }
                from_generic_chat(&text, &tool_calls, model)
            }
            None => from_generic_chat(NO_RESPONSE_TEXT, &[], model),
        };
        debug!(id = %converted.id, stop_reason = ?converted.stop_reason, "Host model replied");
        Ok(converted.message)
    }
}

impl Provider for CustomProvider {
    fn create_completion<'a>(&'a self, request: CompletionRequest<'a>) -> CompletionStream<'a> {
        stream::once(async move {
            let model = if request.model.is_empty() {
                self.model_name()
            } else {
                request.model.to_string()
            };
            let message = match self.complete(&request, &model).await {
                Ok(message) => message,
                Err(e) => {
                    error!("Error calling host model {}: {:#}", model, e);
                    from_generic_chat(&format!("Error: {}", e), &[], &model).message
                }
            };
            Ok(CompletionEvent::Message(message))
        })
        .boxed()
    }

    fn supports_vision(&self) -> bool {
        self.host.supports_vision()
    }

    fn supports_tool_calling(&self) -> bool {
        self.host.supports_functions()
    }

    fn model_name(&self) -> String {
        self.host.settings().model
    }
}
