use super::{
    anthropic::{
        AnthropicProvider, BEDROCK_DEFAULT_MODEL, DIRECT_DEFAULT_MODEL, VERTEX_DEFAULT_MODEL,
    },
    base::Provider,
    configs::{AnthropicEndpoint, ProviderConfig},
    custom::CustomProvider,
};
use anyhow::Result;
use strum_macros::{Display, EnumIter, EnumString};

/// The backends the loop can be pointed at
#[derive(EnumIter, Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum ApiProvider {
    Anthropic,
    Bedrock,
    Vertex,
    Custom,
}

impl ApiProvider {
    /// The model used when none is configured; custom hosts always name their own
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ApiProvider::Anthropic => Some(DIRECT_DEFAULT_MODEL),
            ApiProvider::Bedrock => Some(BEDROCK_DEFAULT_MODEL),
            ApiProvider::Vertex => Some(VERTEX_DEFAULT_MODEL),
            ApiProvider::Custom => None,
        }
    }
}

impl From<&ProviderConfig> for ApiProvider {
    fn from(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Anthropic(anthropic) => match anthropic.endpoint {
                AnthropicEndpoint::Direct { .. } => ApiProvider::Anthropic,
                AnthropicEndpoint::Bedrock { .. } => ApiProvider::Bedrock,
                AnthropicEndpoint::Vertex { .. } => ApiProvider::Vertex,
            },
            ProviderConfig::Custom(_) => ApiProvider::Custom,
        }
    }
}

/// Build the provider for a configuration. Missing credentials fail here, before any turn.
pub async fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider>> {
    match config {
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Box::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::Custom(host) => Ok(Box::new(CustomProvider::new(host).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::AnthropicProviderConfig;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_provider_names() {
        let names: Vec<String> = ApiProvider::iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["anthropic", "bedrock", "vertex", "custom"]);
        assert_eq!(ApiProvider::from_str("vertex").unwrap(), ApiProvider::Vertex);
    }

    #[test]
    fn test_default_models() {
        assert_eq!(
            ApiProvider::Bedrock.default_model(),
            Some("anthropic.claude-3-5-sonnet-20241022-v2:0")
        );
        assert_eq!(ApiProvider::Custom.default_model(), None);
    }

    #[tokio::test]
    async fn test_get_provider_fails_fast_without_credentials() {
        let config = ProviderConfig::Anthropic(AnthropicProviderConfig::direct(
            "https://api.anthropic.com",
            " ",
        ));
        assert_eq!(ApiProvider::from(&config), ApiProvider::Anthropic);
        assert!(get_provider(config).await.is_err());
    }

    #[tokio::test]
    async fn test_get_provider_uses_default_model() {
        let config = ProviderConfig::Anthropic(AnthropicProviderConfig::direct(
            "https://api.anthropic.com",
            "key",
        ));
        let provider = get_provider(config).await.unwrap();
        assert_eq!(provider.model_name(), DIRECT_DEFAULT_MODEL);
        assert!(provider.supports_vision());
    }
}
