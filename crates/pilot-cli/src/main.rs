mod configuration;
mod error;
mod render;
mod session;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use pilot::providers::factory::get_provider;
use pilot::tools::{ComputerTool, ToolCollection};
use tracing_subscriber::EnvFilter;

use crate::configuration::{Overrides, Settings};
use crate::session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Provider to use: anthropic, bedrock, vertex or custom (PILOT_PROVIDER__TYPE)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use, defaults to the provider's model
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the provider endpoint
    #[arg(long)]
    api_base: Option<String>,

    /// API key or bearer token for the provider
    #[arg(long)]
    api_key: Option<String>,

    /// Maximum tokens per model reply
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Context window of a custom host model
    #[arg(long)]
    context_window: Option<u32>,

    /// Keep only this many screenshots in the conversation
    #[arg(long)]
    only_n_most_recent_images: Option<u32>,

    /// X display number to control
    #[arg(long)]
    display_num: Option<u32>,

    /// Path to a TOML config file, defaults to ~/.config/pilot/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            max_tokens: self.max_tokens,
            context_window: self.context_window,
            only_n_most_recent_images: self.only_n_most_recent_images,
            display_num: self.display_num,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())?;

    let api_provider = settings.provider.api_provider();
    let options = settings.loop_options();
    let display_num = settings.computer.display_num;

    let provider = get_provider(settings.provider.into_config()?)
        .await
        .with_context(|| format!("Failed to set up the {} provider", api_provider))?;
    let computer =
        ComputerTool::new(display_num).context("Failed to connect to the display")?;
    let tools = ToolCollection::new().with_tool(Box::new(computer));

    let mut session = Session::new(api_provider, provider, tools, options)?;
    session.start().await
}
