pub mod anthropic;
pub mod base;
pub mod chat_completions;
pub mod configs;
pub mod custom;
pub mod factory;
pub mod format;
pub mod host;
pub mod streaming;

#[cfg(test)]
pub mod mock;
