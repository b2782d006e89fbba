use anyhow::{anyhow, Context, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::models::content::{ContentBlock, ToolResultContent};
use crate::models::history::History;
use crate::models::message::Message;
use crate::models::tool::ToolResult;
use crate::prompt_template;
use crate::providers::base::{CompletionEvent, CompletionRequest, Provider};
use crate::retention::filter_to_n_most_recent_images;
use crate::tools::ToolCollection;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_IMAGE_TRUNCATION_CHUNK: usize = 5;

/// What the loop reports while it runs
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// Incremental model text, for display only
    Chunk(String),
    /// The loop finished; carries the full history
    Messages(History),
    /// The loop stopped early; history holds only whole turns
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    /// Overrides the provider's model
    pub model: Option<String>,
    pub system_prompt_suffix: Option<String>,
    pub max_tokens: u32,
    /// Keep only this many tool-result images, oldest removed first
    pub only_n_most_recent_images: Option<usize>,
    pub image_truncation_chunk: usize,
}

impl Default for LoopOptions {
    fn default() -> Self {
        LoopOptions {
            model: None,
            system_prompt_suffix: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            only_n_most_recent_images: None,
            image_truncation_chunk: DEFAULT_IMAGE_TRUNCATION_CHUNK,
        }
    }
}

pub type OutputCallback = Box<dyn Fn(&ContentBlock) + Send + Sync>;
pub type ToolOutputCallback = Box<dyn Fn(&ToolResult, &str) + Send + Sync>;

/// Drives a conversation until the model stops asking for tools
pub struct SamplingLoop {
    provider: Box<dyn Provider>,
    tools: ToolCollection,
    options: LoopOptions,
    system_prompt: String,
    on_output: Option<OutputCallback>,
    on_tool_output: Option<ToolOutputCallback>,
}

/// Turn a tool's outcome into the block answering `tool_use_id`
pub fn make_tool_result_block(result: &ToolResult, tool_use_id: &str) -> ContentBlock {
    let mut content = Vec::new();

    let primary = result
        .output
        .as_deref()
        .filter(|output| !output.is_empty())
        .or(result.error.as_deref());
    if let Some(text) = primary {
        let text = match &result.system {
            Some(system) => format!("<system>{}</system>\n{}", system, text),
            None => text.to_string(),
        };
        content.push(ToolResultContent::text(text));
    }
    if let Some(image) = &result.base64_image {
        content.push(ToolResultContent::image(image.clone(), "image/png"));
    }

    ContentBlock::tool_result(tool_use_id, content, result.is_error())
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Resolves once cancellation is requested; never resolves if the sender is gone
async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl SamplingLoop {
    pub fn new(provider: Box<dyn Provider>, tools: ToolCollection, options: LoopOptions) -> Result<Self> {
        let system_prompt = prompt_template::system_prompt(options.system_prompt_suffix.as_deref())
            .context("Failed to render the system prompt")?;

        Ok(Self {
            provider,
            tools,
            options,
            system_prompt,
            on_output: None,
            on_tool_output: None,
        })
    }

    /// Replace the rendered system prompt
    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Observe every content block of every assistant message
    pub fn on_output<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ContentBlock) + Send + Sync + 'static,
    {
        self.on_output = Some(Box::new(callback));
        self
    }

    /// Observe every tool result along with the id of the tool use it answers
    pub fn on_tool_output<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ToolResult, &str) + Send + Sync + 'static,
    {
        self.on_tool_output = Some(Box::new(callback));
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model(&self) -> String {
        self.options
            .model
            .clone()
            .unwrap_or_else(|| self.provider.model_name())
    }

    /// Run turns until the model answers without tool uses.
    ///
    /// The stream ends after [`LoopEvent::Messages`] or [`LoopEvent::Cancelled`]. A turn's
    /// assistant message and its tool results are appended to `history` together, so an
    /// interrupted run leaves no unanswered tool use behind.
    pub fn run<'a>(
        &'a self,
        history: &'a mut History,
        mut cancel: watch::Receiver<bool>,
    ) -> BoxStream<'a, Result<LoopEvent>> {
        Box::pin(async_stream::try_stream! {
            let model = self.model();
            let tools = self.tools.schemas();
            let mut turn = 0;

            loop {
                turn += 1;
                if is_cancelled(&cancel) {
                    info!(turn, "Sampling loop cancelled before calling the model");
                    yield LoopEvent::Cancelled;
                    break;
                }

                if let Some(keep) = self.options.only_n_most_recent_images {
                    filter_to_n_most_recent_images(history, keep, self.options.image_truncation_chunk);
                }

                debug!(turn, %model, messages = history.len(), "Requesting assistant turn");
                let request = CompletionRequest {
                    messages: history.messages(),
                    model: &model,
                    system: &self.system_prompt,
                    tools: &tools,
                    max_tokens: self.options.max_tokens,
                };
                let mut events = self.provider.create_completion(request);

                let mut reply = None;
                let mut interrupted = false;
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancellation(&mut cancel) => None,
                        event = events.next() => Some(event),
                    };
                    match next {
                        None => {
                            interrupted = true;
                            break;
                        }
                        Some(None) => break,
                        Some(Some(event)) => match event? {
                            CompletionEvent::Chunk(text) => yield LoopEvent::Chunk(text),
                            CompletionEvent::Message(message) => {
                                reply = Some(message);
                                break;
                            }
                        },
                    }
                }
                // only the first message of a completion is used
                drop(events);

                if interrupted {
                    info!(turn, "Sampling loop cancelled while waiting for the model");
                    yield LoopEvent::Cancelled;
                    break;
                }
                let reply = reply.ok_or_else(|| anyhow!("Provider ended the turn without a message"))?;

                let mut results = Vec::new();
                for block in reply.blocks() {
                    if let Some(callback) = &self.on_output {
                        callback(block);
                    }
                    if let ContentBlock::ToolUse(tool_use) = block {
                        if is_cancelled(&cancel) {
                            interrupted = true;
                            break;
                        }
                        let result = self.tools.run(&tool_use.name, tool_use.input.clone()).await;
                        if let Some(callback) = &self.on_tool_output {
                            callback(&result, &tool_use.id);
                        }
                        results.push(make_tool_result_block(&result, &tool_use.id));
                    }
                }

                if interrupted {
                    info!(turn, "Sampling loop cancelled between tool calls");
                    yield LoopEvent::Cancelled;
                    break;
                }

                if results.is_empty() {
                    history
                        .push(reply)
                        .context("Assistant reply breaks the conversation history")?;
                    debug!(turn, "Assistant turn has no tool uses, done");
                    yield LoopEvent::Messages(history.clone());
                    break;
                }

                debug!(turn, tool_results = results.len(), "Appending tool results");
                let mut tool_results = Message::user();
                for block in results {
                    tool_results = tool_results.with_content(block);
                }
                history
                    .extend(vec![reply, tool_results])
                    .context("Tool results break the conversation history")?;
            }
        })
    }
}
