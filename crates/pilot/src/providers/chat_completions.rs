use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::format::{render_textual_tool_call, ChatContent, ChatContentPart, ChatMessage, ChatToolCall};
use super::host::{HostModel, HostModelSettings, ResponseFragment};
use crate::models::message::Role;

/// A host model behind any OpenAI-compatible chat completions endpoint
pub struct ChatCompletionsModel {
    client: Client,
    settings: RwLock<HostModelSettings>,
    supports_vision: bool,
    supports_functions: bool,
    loaded: AtomicBool,
}

impl ChatCompletionsModel {
    pub fn new(
        settings: HostModelSettings,
        supports_vision: bool,
        supports_functions: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            settings: RwLock::new(settings),
            supports_vision,
            supports_functions,
            loaded: AtomicBool::new(false),
        })
    }

    fn url(api_base: &str) -> String {
        let base = api_base.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn messages_to_openai_spec(messages: &[ChatMessage]) -> Result<Vec<Value>> {
        messages
            .iter()
            .map(|message| {
                let mut message = message.clone();
                // endpoints reject tool_calls without matching tool messages
                let calls = std::mem::take(&mut message.tool_calls);
                append_textual_calls(&mut message, &calls);
                let mut value = serde_json::to_value(&message)?;
                // chat endpoints have no computer role
                if message.role == Role::Computer {
                    value["role"] = json!("user");
                }
                Ok(value)
            })
            .collect()
    }

    async fn post(&self, url: &str, api_key: Option<&str>, payload: &Value) -> Result<Value> {
        let mut request = self.client.post(url).json(payload);
        if let Some(key) = api_key.filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let error_text = response.text().await?;
                Err(anyhow!("Request failed: {} - {}", status, error_text))
            }
        }
    }
}

/// Fold tool calls into the message text, skipping calls the text already spells out
fn append_textual_calls(message: &mut ChatMessage, calls: &[ChatToolCall]) {
    let existing = message.text_content();
    let missing: Vec<String> = calls
        .iter()
        .map(render_textual_tool_call)
        .filter(|call| !existing.contains(call.as_str()))
        .collect();
    if missing.is_empty() {
        return;
    }

    let calls = missing.join("\n");
    message.content = Some(match message.content.take() {
        None => ChatContent::Text(calls),
        Some(ChatContent::Text(text)) if text.is_empty() => ChatContent::Text(calls),
        Some(ChatContent::Text(text)) => ChatContent::Text(format!("{}\n{}", text, calls)),
        Some(ChatContent::Parts(mut parts)) => {
            parts.push(ChatContentPart::Text { text: calls });
            ChatContent::Parts(parts)
        }
    });
}

#[async_trait]
impl HostModel for ChatCompletionsModel {
    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn load(&self) -> Result<()> {
        let settings = self.settings();
        if settings.model.trim().is_empty() {
            return Err(anyhow!("Host model has no model name configured"));
        }
        if settings.api_base.as_deref().map_or(true, |b| b.trim().is_empty()) {
            return Err(anyhow!("Host model {} has no api_base configured", settings.model));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn supports_vision(&self) -> bool {
        self.supports_vision
    }

    fn supports_functions(&self) -> bool {
        self.supports_functions
    }

    fn settings(&self) -> HostModelSettings {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn configure(&self, settings: HostModelSettings) {
        match self.settings.write() {
            Ok(mut current) => *current = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    async fn run<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Result<BoxStream<'a, Result<ResponseFragment>>> {
        let settings = self.settings();
        let api_base = settings
            .api_base
            .as_deref()
            .ok_or_else(|| anyhow!("Host model has no api_base configured"))?;

        let mut payload = json!({
            "model": settings.model,
            "messages": Self::messages_to_openai_spec(messages)?,
        });
        if let Some(tokens) = settings.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }

        let response = self
            .post(&Self::url(api_base), settings.api_key.as_deref(), &payload)
            .await?;

        let message = response
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| anyhow!("Invalid response format from chat completions endpoint"))?;

        let fragments: Vec<Result<ResponseFragment>> = message
            .get("content")
            .and_then(|content| content.as_str())
            .map(|content| Ok(ResponseFragment::assistant(content)))
            .into_iter()
            .collect();

        Ok(stream::iter(fragments).boxed())
    }
}
