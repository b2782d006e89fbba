use std::sync::Arc;

use super::host::HostModel;

// Unified enum to wrap different provider configurations
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    Custom(Arc<dyn HostModel>),
}

/// Which family of endpoints serves the native protocol
#[derive(Debug, Clone, PartialEq)]
pub enum AnthropicEndpoint {
    Direct {
        host: String,
        api_key: String,
    },
    Bedrock {
        region: String,
        token: String,
        base_url: Option<String>,
    },
    Vertex {
        region: String,
        project_id: String,
        token: String,
        base_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicProviderConfig {
    pub endpoint: AnthropicEndpoint,
    /// Overrides the endpoint family's default model
    pub model: Option<String>,
    /// Request server-sent events where the endpoint family supports them
    pub stream: bool,
}

impl AnthropicProviderConfig {
    pub fn direct<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Self {
        AnthropicProviderConfig {
            endpoint: AnthropicEndpoint::Direct {
                host: host.into(),
                api_key: api_key.into(),
            },
            model: None,
            stream: true,
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}
