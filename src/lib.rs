//! # chatstream - streaming chat completions from hosted LLM backends
//!
//! Sends a conversation to OpenAI, Anthropic (Messages or the legacy
//! completion API) or a self-hosted OpenAI-compatible server and turns the
//! Server-Sent Events response into a growing piece of text.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Chunk-boundary independent SSE reassembly
//! - Both cumulative and incremental text families behind one accumulator
//! - Exactly-once resolution with caller callbacks and cancellation
//!
//! ## Architecture
//!
//! Bytes flow through a [`sse::LineBuffer`], are classified by
//! [`sse::parse_event`], decoded by the provider's [`providers::StreamFormat`]
//! and folded into an [`accumulator::Accumulator`]. A
//! [`session::StreamSession`] owns that pipeline for one request and reports
//! the cumulative text to [`session::StreamCallbacks`].
//!
//! ## Example
//! ```no_run
//! use chatstream::chat::Chat;
//! use chatstream::config::ChatConfig;
//! use chatstream::credentials::EnvCredentials;
//! use chatstream::session::StreamCallbacks;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatConfig::from_json(r#"{"model": "claude-3-5-haiku-latest", "maxLength": 256}"#)?;
//!     let mut chat = Chat::from_config(&config, &EnvCredentials).await?;
//!
//!     let callbacks = StreamCallbacks::new().on_update(|text| {
//!         println!("{text}");
//!         Ok(())
//!     });
//!     let result = chat.send("What is a borrow checker?", callbacks).await?;
//!     println!("{:?}", result.stop_reason);
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod chat;
pub mod client;
pub mod config;
pub mod credentials;
pub mod http;
pub mod model;
pub mod options;
pub mod providers;
pub mod session;
pub mod sse;

// Re-exports for convenience
pub use chat::Chat;
pub use client::{ClientError, StreamingProvider};
pub use config::ChatConfig;
pub use model::{CompletionResult, Conversation, Message, Role, StopReason};
pub use providers::{Provider, ProviderKind};
pub use session::StreamCallbacks;
