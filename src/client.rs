//! Core provider capability and error types.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::credentials::CredentialProvider;
use crate::model::{CompletionResult, Message};
use crate::options::SamplingParameters;
use crate::providers::ProviderKind;
use crate::session::StreamCallbacks;

/// Boxed error returned by caller callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection-level failure: DNS, TLS, reset, timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered the initial request with a non-success status.
    #[error("{provider} request failed with status {}: {message}", .status.as_u16())]
    Status {
        provider: ProviderKind,
        status: StatusCode,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The backend reported an error inside the event stream.
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Stream ended before a stop reason was received")]
    StreamEnded,

    /// A caller-supplied `on_open` or `on_update` callback failed.
    #[error("Callback failed: {0}")]
    Callback(#[source] BoxError),

    #[error("{0} provider is not initialized")]
    NotInitialized(ProviderKind),

    #[error("No API key provided for {0}")]
    MissingCredential(ProviderKind),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// HTTP status of a rejected request, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
            _ => None,
        }
    }

    /// Provider the error is attributable to, when known.
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            ClientError::Status { provider, .. }
            | ClientError::NotInitialized(provider)
            | ClientError::MissingCredential(provider) => Some(*provider),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::StreamCancelled)
    }

    /// Whether the failure happened on the wire rather than in this process.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Http(_) | ClientError::Status { .. } | ClientError::StreamEnded
        )
    }

    /// Most likely cause of the failure, phrased for an end user.
    pub fn hint(&self) -> &'static str {
        match self.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => "Invalid API key, or the key does not grant access to this model.",
            Some(404) => "Unknown model name, or the model is not available for this API key.",
            Some(429) => "Rate limit or quota exceeded; check the provider's billing settings.",
            Some(400) | Some(413) => "The request was rejected; the chat history may be too long for the model's context window.",
            Some(code) if code >= 500 => "The provider is having issues; check its status page and try again.",
            _ => match self {
                ClientError::MissingCredential(_) | ClientError::NotInitialized(_) => {
                    "No API key is configured for this provider."
                }
                ClientError::Config(_) => "Check the model, max length and temperature settings.",
                ClientError::Http(e) if e.is_timeout() => "The request timed out.",
                ClientError::Http(_) => "Could not reach the provider; check your network connection.",
                ClientError::StreamCancelled => "The request was cancelled.",
                _ => "Unexpected error while streaming the response.",
            },
        }
    }
}

/// Capability shared by every backend family.
///
/// Each provider variant builds its own wire request and decodes its own event
/// payloads, then hands the connection to a [`crate::session::StreamSession`]
/// so callers see the same `on_update(cumulative_text)` / `on_complete`
/// contract everywhere.
///
/// # Example
/// ```rust,ignore
/// let mut provider = Provider::new(ProviderKind::Anthropic, TransportOptions::new());
/// provider.init(&EnvCredentials).await?;
///
/// let callbacks = StreamCallbacks::new().on_update(|text| {
///     println!("{text}");
///     Ok(())
/// });
/// let result = provider.complete_stream(conversation.messages(), &params, callbacks).await?;
/// ```
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    /// Which backend family this provider talks to.
    fn kind(&self) -> ProviderKind;

    /// Resolve credentials. Must succeed before [`StreamingProvider::complete_stream`].
    async fn init(&mut self, credentials: &dyn CredentialProvider) -> Result<(), ClientError>;

    fn is_initialized(&self) -> bool;

    /// Stream one completion for `messages`, reporting progress through `callbacks`.
    async fn complete_stream(
        &self,
        messages: &[Message],
        params: &SamplingParameters,
        callbacks: StreamCallbacks<'_>,
    ) -> Result<CompletionResult, ClientError>;
}
