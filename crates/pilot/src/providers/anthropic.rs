use anyhow::{anyhow, Result};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::base::{CompletionEvent, CompletionRequest, CompletionStream, Provider};
use super::configs::{AnthropicEndpoint, AnthropicProviderConfig};
use super::streaming::{parse_sse_event, MessageAssembler};
use crate::models::content::ContentBlock;
use crate::models::message::{Message, MessageContent, Role};
use crate::models::tool::ToolSchema;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const COMPUTER_USE_BETA: &str = "computer-use-2024-10-22";
pub const VERTEX_VERSION: &str = "vertex-2023-10-16";
pub const BEDROCK_VERSION: &str = "bedrock-2023-05-31";

pub const DIRECT_HOST: &str = "https://api.anthropic.com";

pub const DIRECT_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const BEDROCK_DEFAULT_MODEL: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";
pub const VERTEX_DEFAULT_MODEL: &str = "claude-3-5-sonnet-v2@20241022";

/// Speaks the native tool-calling protocol to any of its endpoint families
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        Self::validate(&config.endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn validate(endpoint: &AnthropicEndpoint) -> Result<()> {
        let missing = match endpoint {
            AnthropicEndpoint::Direct { host, api_key } => [
                ("host", host.as_str()),
                ("api_key", api_key.as_str()),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty()),
            AnthropicEndpoint::Bedrock { region, token, .. } => [
                ("region", region.as_str()),
                ("token", token.as_str()),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty()),
            AnthropicEndpoint::Vertex {
                region,
                project_id,
                token,
                ..
            } => [
                ("region", region.as_str()),
                ("project_id", project_id.as_str()),
                ("token", token.as_str()),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty()),
        };
        match missing {
            Some((field, _)) => Err(anyhow!("Anthropic provider is missing required setting: {}", field)),
            None => Ok(()),
        }
    }

    fn default_model(&self) -> &'static str {
        match self.config.endpoint {
            AnthropicEndpoint::Direct { .. } => DIRECT_DEFAULT_MODEL,
            AnthropicEndpoint::Bedrock { .. } => BEDROCK_DEFAULT_MODEL,
            AnthropicEndpoint::Vertex { .. } => VERTEX_DEFAULT_MODEL,
        }
    }

    /// Bedrock frames its stream in a binary envelope we do not decode
    fn streams(&self) -> bool {
        self.config.stream && !matches!(self.config.endpoint, AnthropicEndpoint::Bedrock { .. })
    }

    fn url(&self, model: &str, stream: bool) -> String {
        match &self.config.endpoint {
            AnthropicEndpoint::Direct { host, .. } => {
                format!("{}/v1/messages", host.trim_end_matches('/'))
            }
            AnthropicEndpoint::Bedrock {
                region, base_url, ..
            } => {
                let base = base_url
                    .clone()
                    .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", region));
                format!("{}/model/{}/invoke", base.trim_end_matches('/'), model)
            }
            AnthropicEndpoint::Vertex {
                region,
                project_id,
                base_url,
                ..
            } => {
                let base = base_url
                    .clone()
                    .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", region));
                let method = if stream { "streamRawPredict" } else { "rawPredict" };
                format!(
                    "{}/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:{}",
                    base.trim_end_matches('/'),
                    project_id,
                    region,
                    model,
                    method
                )
            }
        }
    }

    fn tools_to_anthropic_spec(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| match &tool.native {
                Some(native) => native.clone(),
                None => json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                }),
            })
            .collect()
    }

    /// Role::Computer has no native counterpart; its turns are sent as user turns
    fn messages_to_anthropic_spec(messages: &[Message]) -> Result<Vec<Value>> {
        messages
            .iter()
            .filter(|message| message.role != Role::System)
            .map(|message| {
                let role = match message.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                Ok(json!({
                    "role": role,
                    "content": serde_json::to_value(&message.content)?,
                }))
            })
            .collect()
    }

    fn build_payload(
        &self,
        request: &CompletionRequest<'_>,
        model: &str,
        stream: bool,
    ) -> Result<Value> {
        let mut payload = json!({
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": Self::messages_to_anthropic_spec(request.messages)?,
            "tools": Self::tools_to_anthropic_spec(request.tools),
            "stream": stream,
        });

        let fields = payload
            .as_object_mut()
            .ok_or_else(|| anyhow!("Request payload is not an object"))?;
        match self.config.endpoint {
            AnthropicEndpoint::Direct { .. } => {
                fields.insert("model".to_string(), json!(model));
            }
            AnthropicEndpoint::Bedrock { .. } => {
                fields.insert("anthropic_version".to_string(), json!(BEDROCK_VERSION));
                fields.insert("anthropic_beta".to_string(), json!([COMPUTER_USE_BETA]));
                fields.remove("stream");
            }
            AnthropicEndpoint::Vertex { .. } => {
                fields.insert("anthropic_version".to_string(), json!(VERTEX_VERSION));
            }
        }
        Ok(payload)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.endpoint {
            AnthropicEndpoint::Direct { api_key, .. } => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("anthropic-beta", COMPUTER_USE_BETA),
            AnthropicEndpoint::Bedrock { token, .. } => builder.bearer_auth(token),
            AnthropicEndpoint::Vertex { token, .. } => builder
                .bearer_auth(token)
                .header("anthropic-beta", COMPUTER_USE_BETA),
        }
    }

    async fn post(&self, url: &str, payload: &Value) -> Result<Response> {
        let response = self
            .authorize(self.client.post(url))
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let error_text = response.text().await?;
                Err(anyhow!("Request failed: {} - {}", status, error_text))
            }
        }
    }

    /// Decode a non-streaming response body into an assistant message
    fn response_to_message(response: &Value) -> Result<Message> {
        let content = response
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;

        let mut blocks = Vec::with_capacity(content.len());
        for item in content {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("text") | Some("tool_use") => {
                    blocks.push(serde_json::from_value::<ContentBlock>(item.clone())?)
                }
                other => warn!("Skipping unsupported content block: {:?}", other),
            }
        }
        Ok(Message::new(Role::Assistant, MessageContent::Blocks(blocks)))
    }
}

impl Provider for AnthropicProvider {
    fn create_completion<'a>(&'a self, request: CompletionRequest<'a>) -> CompletionStream<'a> {
        Box::pin(async_stream::try_stream! {
            let model = if request.model.is_empty() {
                self.model_name()
            } else {
                request.model.to_string()
            };
            let stream = self.streams();
            let payload = self.build_payload(&request, &model, stream)?;
            let url = self.url(&model, stream);
            debug!(%url, %model, stream, "Requesting completion");

            let response = self.post(&url, &payload).await?;

            if !stream {
                let body: Value = response.json().await?;
                yield CompletionEvent::Message(Self::response_to_message(&body)?);
            } else {
                let mut events = Box::pin(response.bytes_stream().eventsource());
                let mut assembler = MessageAssembler::new();

                while let Some(event) = events.next().await {
                    let event = event.map_err(|e| anyhow!("Malformed event stream: {}", e))?;
                    if let Some(event) = parse_sse_event(&event.event, &event.data) {
                        for text in assembler.apply(event)? {
                            yield CompletionEvent::Chunk(text);
                        }
                    }
                    if assembler.is_stopped() {
                        break;
                    }
                }

                yield CompletionEvent::Message(assembler.finish());
            }
        })
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn model_name(&self) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| self.default_model().to_string())
    }
}
