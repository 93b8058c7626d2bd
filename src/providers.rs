//! Backend provider adapters and runtime dispatch between them.

pub mod anthropic;
pub mod anthropic_complete;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::accumulator::{Delta, SentinelPolicy};
use crate::client::{ClientError, StreamingProvider};
use crate::credentials::CredentialProvider;
use crate::model::{CompletionResult, Message};
use crate::options::{SamplingParameters, TransportOptions};
use crate::session::StreamCallbacks;

// Re-export for convenience
pub use anthropic::AnthropicProvider;
pub use anthropic_complete::AnthropicCompleteProvider;
pub use openai::OpenAiProvider;

/// Runtime tag selecting a backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI Chat Completions.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages API.
    #[serde(rename = "anthropic")]
    Anthropic,
    /// Anthropic legacy text completion API.
    #[serde(rename = "anthropic-complete")]
    AnthropicComplete,
    /// Self-hosted server speaking the Chat Completions protocol.
    #[serde(rename = "custom")]
    Custom,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::AnthropicComplete,
        ProviderKind::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::AnthropicComplete => "anthropic-complete",
            ProviderKind::Custom => "custom",
        }
    }

    /// Infer the backend from a model identifier.
    ///
    /// `gpt*` models go to OpenAI, the literal `custom` to a custom server,
    /// first-generation Claude models to the legacy completion API and every
    /// other model to the Anthropic Messages API.
    pub fn from_model(model: &str) -> Self {
        const LEGACY_CLAUDE: [&str; 4] = ["claude-v1", "claude-1", "claude-2", "claude-instant"];

        if model.starts_with("gpt") {
            ProviderKind::OpenAi
        } else if model == "custom" {
            ProviderKind::Custom
        } else if LEGACY_CLAUDE.iter().any(|prefix| model.starts_with(prefix)) {
            ProviderKind::AnthropicComplete
        } else {
            ProviderKind::Anthropic
        }
    }

    /// Environment variable consulted by [`crate::credentials::EnvCredentials`].
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic | ProviderKind::AnthropicComplete => "ANTHROPIC_API_KEY",
            ProviderKind::Custom => "CUSTOM_LLM_API_KEY",
        }
    }

    /// Whether requests cannot be sent without an API key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderKind::Custom)
    }

    /// Wire format of this backend's event stream.
    pub fn stream_format(self) -> StreamFormat {
        match self {
            ProviderKind::OpenAi | ProviderKind::Custom => StreamFormat::ChatCompletions,
            ProviderKind::Anthropic => StreamFormat::Messages,
            ProviderKind::AnthropicComplete => StreamFormat::Completion,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ClientError::Config(format!("invalid provider \"{s}\"")))
    }
}

/// Event payload schema of a backend family.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamFormat {
    /// Every event carries the full completion so far; a non-null
    /// `stop_reason` ends the stream.
    Completion,
    /// Typed events carrying text fragments; `message_stop` or `[DONE]`
    /// ends the stream.
    Messages,
    /// `choices[0].delta.content` fragments; `[DONE]` ends the stream.
    ChatCompletions,
}

impl StreamFormat {
    pub fn sentinel(self) -> SentinelPolicy {
        match self {
            StreamFormat::Completion => SentinelPolicy::Premature,
            StreamFormat::Messages | StreamFormat::ChatCompletions => SentinelPolicy::Terminal,
        }
    }

    /// Decode one `data:` payload into a provider-neutral [`Delta`].
    pub fn decode(self, payload: &str) -> Result<Delta, serde_json::Error> {
        match self {
            StreamFormat::Completion => anthropic_complete::decode_event(payload),
            StreamFormat::Messages => anthropic::decode_event(payload),
            StreamFormat::ChatCompletions => openai::decode_event(payload),
        }
    }
}

/// Fail fast on parameters that would not produce an event stream.
pub(crate) fn ensure_streaming(params: &SamplingParameters) -> Result<(), ClientError> {
    if !params.stream {
        return Err(ClientError::Config("streaming must be enabled".to_string()));
    }
    if params.model.trim().is_empty() {
        return Err(ClientError::Config("no model configured".to_string()));
    }
    Ok(())
}

/// A provider selected at runtime by its [`ProviderKind`].
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    AnthropicComplete(AnthropicCompleteProvider),
}

impl Provider {
    /// Create an uninitialized provider for `kind`.
    pub fn new(kind: ProviderKind, transport_options: TransportOptions) -> Self {
        match kind {
            ProviderKind::OpenAi => Provider::OpenAi(OpenAiProvider::new(transport_options)),
            ProviderKind::Custom => Provider::OpenAi(OpenAiProvider::custom(transport_options)),
            ProviderKind::Anthropic => {
                Provider::Anthropic(AnthropicProvider::new(transport_options))
            }
            ProviderKind::AnthropicComplete => {
                Provider::AnthropicComplete(AnthropicCompleteProvider::new(transport_options))
            }
        }
    }

    fn inner(&self) -> &dyn StreamingProvider {
        match self {
            Provider::OpenAi(p) => p,
            Provider::Anthropic(p) => p,
            Provider::AnthropicComplete(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn StreamingProvider {
        match self {
            Provider::OpenAi(p) => p,
            Provider::Anthropic(p) => p,
            Provider::AnthropicComplete(p) => p,
        }
    }
}

#[async_trait]
impl StreamingProvider for Provider {
    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    async fn init(&mut self, credentials: &dyn CredentialProvider) -> Result<(), ClientError> {
        self.inner_mut().init(credentials).await
    }

    fn is_initialized(&self) -> bool {
        self.inner().is_initialized()
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        params: &SamplingParameters,
        callbacks: StreamCallbacks<'_>,
    ) -> Result<CompletionResult, ClientError> {
        self.inner().complete_stream(messages, params, callbacks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_model() {
        assert_eq!(ProviderKind::from_model("gpt-4o"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("gpt-3.5-turbo"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("custom"), ProviderKind::Custom);
        assert_eq!(ProviderKind::from_model("claude-v1.3"), ProviderKind::AnthropicComplete);
        assert_eq!(ProviderKind::from_model("claude-instant-1.2"), ProviderKind::AnthropicComplete);
        assert_eq!(ProviderKind::from_model("claude-2.1"), ProviderKind::AnthropicComplete);
        assert_eq!(ProviderKind::from_model("claude-3-5-sonnet-latest"), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_model("claude-sonnet-4-5"), ProviderKind::Anthropic);
    }

    #[test]
    fn test_provider_kind_names_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
        assert!(matches!("azure".parse::<ProviderKind>(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_stream_format_sentinel_policy() {
        assert_eq!(StreamFormat::Completion.sentinel(), SentinelPolicy::Premature);
        assert_eq!(StreamFormat::Messages.sentinel(), SentinelPolicy::Terminal);
        assert_eq!(StreamFormat::ChatCompletions.sentinel(), SentinelPolicy::Terminal);
    }

    #[test]
    fn test_provider_dispatch_by_kind() {
        for kind in ProviderKind::ALL {
            let provider = Provider::new(kind, TransportOptions::new());
            assert_eq!(provider.kind(), kind);
            assert!(!provider.is_initialized());
        }
    }
}
