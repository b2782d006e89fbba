use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use config::{Config, Environment, File};
use pilot::providers::anthropic::DIRECT_HOST;
use pilot::providers::chat_completions::ChatCompletionsModel;
use pilot::providers::configs::{AnthropicEndpoint, AnthropicProviderConfig, ProviderConfig};
use pilot::providers::factory::ApiProvider;
use pilot::providers::host::HostModelSettings;
use pilot::sampling_loop::{LoopOptions, DEFAULT_IMAGE_TRUNCATION_CHUNK, DEFAULT_MAX_TOKENS};
use serde::Deserialize;

use crate::error::{to_env_var, ConfigError, ENV_PREFIX};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host", alias = "api_base")]
        host: String,
        api_key: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default = "default_stream")]
        stream: bool,
    },
    Bedrock {
        region: String,
        #[serde(alias = "api_key")]
        token: String,
        #[serde(default, alias = "api_base")]
        base_url: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Vertex {
        region: String,
        project_id: String,
        #[serde(alias = "api_key")]
        token: String,
        #[serde(default, alias = "api_base")]
        base_url: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default = "default_stream")]
        stream: bool,
    },
    Custom {
        api_base: String,
        #[serde(default)]
        api_key: Option<String>,
        model: String,
        #[serde(default)]
        supports_vision: bool,
        #[serde(default)]
        supports_functions: bool,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default)]
        context_window: Option<u32>,
    },
}

impl ProviderSettings {
    pub fn api_provider(&self) -> ApiProvider {
        match self {
            ProviderSettings::Anthropic { .. } => ApiProvider::Anthropic,
            ProviderSettings::Bedrock { .. } => ApiProvider::Bedrock,
            ProviderSettings::Vertex { .. } => ApiProvider::Vertex,
            ProviderSettings::Custom { .. } => ApiProvider::Custom,
        }
    }

    /// The configured model, or the endpoint family's default
    pub fn model(&self) -> Option<String> {
        match self {
            ProviderSettings::Anthropic { model, .. }
            | ProviderSettings::Bedrock { model, .. }
            | ProviderSettings::Vertex { model, .. } => model
                .clone()
                .or_else(|| self.api_provider().default_model().map(String::from)),
            ProviderSettings::Custom { model, .. } => Some(model.clone()),
        }
    }

    // Convert to the pilot ProviderConfig
    pub fn into_config(self) -> Result<ProviderConfig> {
        let config = match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                stream,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                endpoint: AnthropicEndpoint::Direct { host, api_key },
                model,
                stream,
            }),
            ProviderSettings::Bedrock {
                region,
                token,
                base_url,
                model,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                endpoint: AnthropicEndpoint::Bedrock {
                    region,
                    token,
                    base_url,
                },
                model,
                stream: false,
            }),
            ProviderSettings::Vertex {
                region,
                project_id,
                token,
                base_url,
                model,
                stream,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                endpoint: AnthropicEndpoint::Vertex {
                    region,
                    project_id,
                    token,
                    base_url,
                },
                model,
                stream,
            }),
            ProviderSettings::Custom {
                api_base,
                api_key,
                model,
                supports_vision,
                supports_functions,
                max_tokens,
                context_window,
            } => {
                let settings = HostModelSettings {
                    model,
                    api_base: Some(api_base),
                    api_key,
                    max_tokens,
                    context_window,
                };
                let host = ChatCompletionsModel::new(settings, supports_vision, supports_functions)?;
                ProviderConfig::Custom(Arc::new(host))
            }
        };
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub only_n_most_recent_images: Option<usize>,
    #[serde(default = "default_image_truncation_chunk")]
    pub image_truncation_chunk: usize,
    #[serde(default)]
    pub system_prompt_suffix: Option<String>,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        SamplingSettings {
            max_tokens: default_max_tokens(),
            only_n_most_recent_images: None,
            image_truncation_chunk: default_image_truncation_chunk(),
            system_prompt_suffix: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComputerSettings {
    /// X display number for xdotool, e.g. 1 for `:1`
    #[serde(default)]
    pub display_num: Option<u32>,
}

/// Values taken from the command line, applied over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub context_window: Option<u32>,
    pub only_n_most_recent_images: Option<u32>,
    pub display_num: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub computer: ComputerSettings,
}

impl Settings {
    /// Load defaults, then the config file, then `PILOT_` environment variables, then overrides.
    ///
    /// An explicit `config_file` must exist; the default location is optional.
    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => Some(File::from(path).required(true)),
            None => default_config_file().map(|path| File::from(path).required(false)),
        };

        let mut builder = Config::builder()
            .set_default("sampling.max_tokens", default_max_tokens() as i64)?
            .set_default(
                "sampling.image_truncation_chunk",
                default_image_truncation_chunk() as i64,
            )?;
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let config = builder
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("provider.type", overrides.provider.clone())?
            .set_override_option("provider.model", overrides.model.clone())?
            .set_override_option("provider.api_base", overrides.api_base.clone())?
            .set_override_option("provider.api_key", overrides.api_key.clone())?
            .set_override_option("provider.max_tokens", overrides.max_tokens.map(i64::from))?
            .set_override_option(
                "provider.context_window",
                overrides.context_window.map(i64::from),
            )?
            .set_override_option("sampling.max_tokens", overrides.max_tokens.map(i64::from))?
            .set_override_option(
                "sampling.only_n_most_recent_images",
                overrides.only_n_most_recent_images.map(i64::from),
            )?
            .set_override_option("computer.display_num", overrides.display_num.map(i64::from))?
            .build()?;

        let settings = config.try_deserialize::<Self>().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            match missing_field(&err.to_string()) {
                Some(field) => ConfigError::MissingEnvVar {
                    env_var: to_env_var(&field),
                },
                None => match &err {
                    config::ConfigError::NotFound(field) => ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    },
                    _ => ConfigError::Other(err),
                },
            }
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "sampling.max_tokens".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            model: self.provider.model(),
            system_prompt_suffix: self.sampling.system_prompt_suffix.clone(),
            max_tokens: self.sampling.max_tokens,
            only_n_most_recent_images: self.sampling.only_n_most_recent_images,
            image_truncation_chunk: self.sampling.image_truncation_chunk,
        }
    }
}

/// `~/.config/pilot/config.toml` or the platform equivalent
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pilot").join("config.toml"))
}

/// The dotted settings key named by a "missing field" error, if that is what `message` is.
///
/// Fields are reported as "missing field `api_key`", optionally followed by " for key `provider`".
fn missing_field(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    let parent = rest
        .strip_prefix(" for key `")
        .and_then(|rest| rest.split_once('`'))
        .map(|(parent, _)| parent);
    Some(match (parent, field) {
        (Some(parent), _) => format!("{}.{}", parent, field),
        (None, "provider") => "provider.type".to_string(),
        (None, field) => format!("provider.{}", field),
    })
}

fn default_anthropic_host() -> String {
    DIRECT_HOST.to_string()
}

fn default_stream() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_image_truncation_chunk() -> usize {
    DEFAULT_IMAGE_TRUNCATION_CHUNK
}
