use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::format::ChatMessage;
use crate::models::message::Role;

/// The mutable configuration of a host model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostModelSettings {
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub context_window: Option<u32>,
}

/// One role-tagged piece of a host model's reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFragment {
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ResponseFragment {
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        ResponseFragment {
            role: Role::Assistant,
            kind: "message".to_string(),
            content: content.into(),
            format: None,
        }
    }
}

/// An arbitrary chat model the bridged provider can drive.
///
/// Implementations own their runtime and connection details; the bridged provider only
/// queries capabilities and runs generic chat messages through [`HostModel::run`].
#[async_trait]
pub trait HostModel: Send + Sync {
    fn is_loaded(&self) -> bool;

    /// Prepare the model for use. Called once before the first run when not loaded.
    async fn load(&self) -> Result<()>;

    fn supports_vision(&self) -> bool;

    fn supports_functions(&self) -> bool;

    fn settings(&self) -> HostModelSettings;

    /// Replace the mutable settings
    fn configure(&self, settings: HostModelSettings);

    /// Run the conversation and stream back the reply fragments
    async fn run<'a>(
        &'a self,
        messages: &'a [ChatMessage],
    ) -> Result<BoxStream<'a, Result<ResponseFragment>>>;
}
