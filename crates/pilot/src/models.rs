//! These models represent the objects passed around by the sampling loop
//!
//! There are several related conversational formats we need to interact with:
//! - the native tool-calling protocol, which our canonical [`message::Message`] mirrors
//!   closely enough to be serialized verbatim
//! - the generic chat-completion protocol, used by bridged host models
//! - tool invocations, which return a [`tool::ToolResult`]
//!
//! We always convert into these internal structs at the provider boundary so the loop
//! only ever sees one shape.
pub mod content;
pub mod history;
pub mod message;
pub mod tool;
