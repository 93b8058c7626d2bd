//! OpenAI Chat Completions client implementation.
//!
//! Also drives self-hosted servers that speak the same protocol
//! ([`ProviderKind::Custom`]), for which a base URL is mandatory and the
//! API key optional.
//! See: <https://platform.openai.com/docs/api-reference/chat/streaming>

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use crate::accumulator::Delta;
use crate::client::{ClientError, StreamingProvider};
use crate::credentials::{resolve_api_key, CredentialProvider};
use crate::http::event_stream_request;
use crate::model::{CompletionResult, Message, Role, StopReason};
use crate::options::{SamplingParameters, SecretString, TransportOptions};
use crate::providers::{ensure_streaming, ProviderKind};
use crate::session::{StreamCallbacks, StreamSession};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI client using HTTP transport.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    kind: ProviderKind,
    api_key: Option<SecretString>,
    initialized: bool,
    transport_options: TransportOptions,
}

impl OpenAiProvider {
    /// Client for api.openai.com (or `base_url`, when set).
    pub fn new(transport_options: TransportOptions) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            api_key: None,
            initialized: false,
            transport_options,
        }
    }

    /// Client for an OpenAI-compatible server at `transport_options.base_url`.
    pub fn custom(transport_options: TransportOptions) -> Self {
        Self {
            kind: ProviderKind::Custom,
            ..Self::new(transport_options)
        }
    }

    /// Use `api_key` directly instead of resolving it in `init`.
    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self.initialized = true;
        self
    }

    fn api_base(&self) -> Result<&str, ClientError> {
        match self.kind {
            ProviderKind::Custom if self.transport_options.base_url.is_none() => Err(
                ClientError::Config("no server URL configured for the custom provider".to_string()),
            ),
            _ => Ok(self.transport_options.base_url_or(DEFAULT_API_BASE)),
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        params: &SamplingParameters,
    ) -> Result<RequestBuilder, ClientError> {
        if !self.initialized {
            return Err(ClientError::NotInitialized(self.kind));
        }
        ensure_streaming(params)?;

        let url = format!("{}/chat/completions", self.api_base()?);
        let request_body = OpenAiRequest::from((messages, params));

        let mut req = event_stream_request(&self.transport_options, &url)?;
        if let Some(api_key) = &self.api_key {
            req = req.header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()));
        }
        Ok(req.json(&request_body))
    }
}

#[async_trait]
impl StreamingProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn init(&mut self, credentials: &dyn CredentialProvider) -> Result<(), ClientError> {
        self.api_base()?;
        self.api_key = resolve_api_key(credentials, self.kind).await?;
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        params: &SamplingParameters,
        callbacks: StreamCallbacks<'_>,
    ) -> Result<CompletionResult, ClientError> {
        let req = self.build_request(messages, params)?;
        StreamSession::new(self.kind, callbacks).start(req).await
    }
}

impl<'a> From<(&'a [Message], &'a SamplingParameters)> for OpenAiRequest<'a> {
    fn from((messages, params): (&'a [Message], &'a SamplingParameters)) -> Self {
        OpenAiRequest {
            model: &params.model,
            messages: messages.iter().map(OpenAiMessage::from).collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: Some(params.stop_sequences.as_slice()).filter(|s| !s.is_empty()),
            stream: params.stream,
        }
    }
}

impl<'a> From<&'a Message> for OpenAiMessage<'a> {
    fn from(message: &'a Message) -> Self {
        OpenAiMessage {
            role: message.role,
            content: &message.content,
        }
    }
}

/// Decode one streamed payload.
pub(crate) fn decode_event(payload: &str) -> Result<Delta, serde_json::Error> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(payload)?;
    Ok(chunk.into())
}

impl From<OpenAiStreamChunk> for Delta {
    fn from(chunk: OpenAiStreamChunk) -> Self {
        if let Some(error) = chunk.error {
            return Delta {
                error: Some(error.message),
                ..Delta::default()
            };
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Delta {
                request_id: chunk.id,
                ..Delta::default()
            };
        };

        let delta = choice.delta.content.map(Delta::fragment).unwrap_or_default();
        Delta {
            stop_reason: choice.finish_reason.as_deref().and_then(stop_reason),
            request_id: chunk.id,
            ..delta
        }
    }
}

fn stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" => Some(StopReason::EndTurn),
        "length" => Some(StopReason::MaxTokens),
        _ => None,
    }
}

// --- OpenAI API Request/Response Types ---

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage<'a> {
    role: Role,
    content: &'a str,
}

// --- OpenAI Streaming Response Types ---

#[derive(Debug, Clone, Deserialize)]
struct OpenAiStreamChunk {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    error: Option<OpenAiError>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::TextUpdate;
    use crate::credentials::StaticCredentials;

    #[test]
    fn test_request_body() {
        let messages = vec![Message::system("Be brief."), Message::user("2+2?")];
        let params = SamplingParameters::new("gpt-4o", 64)
            .with_temperature(1.0)
            .with_stop_sequences(vec!["\n".to_string()]);
        let body = serde_json::to_value(OpenAiRequest::from((&messages[..], &params))).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "2+2?"},
                ],
                "max_tokens": 64,
                "temperature": 1.0,
                "stop": ["\n"],
                "stream": true,
            })
        );
    }

    #[test]
    fn test_decode_chunks() {
        let delta = decode_event(
            r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(delta.text, TextUpdate::Fragment("Hel".to_string()));
        assert_eq!(delta.request_id.as_deref(), Some("chatcmpl-1"));
        assert!(!delta.finished);

        let delta = decode_event(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#).unwrap();
        assert_eq!(delta.text, TextUpdate::None);
        assert_eq!(delta.stop_reason, Some(StopReason::MaxTokens));

        let usage_only = decode_event(r#"{"id":"chatcmpl-1","choices":[],"usage":{"total_tokens":9}}"#).unwrap();
        assert_eq!(usage_only.text, TextUpdate::None);

        let error = decode_event(r#"{"error":{"message":"model overloaded"}}"#).unwrap();
        assert_eq!(error.error.as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn test_custom_provider_requires_server_url() {
        let mut provider = OpenAiProvider::custom(TransportOptions::new());
        let err = provider.init(&StaticCredentials::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(!provider.is_initialized());

        let mut provider = OpenAiProvider::custom(TransportOptions::new().with_base_url("http://localhost:8000/v1"));
        provider.init(&StaticCredentials::new()).await.unwrap();
        assert!(provider.is_initialized());

        let params = SamplingParameters::new("custom", 32);
        let request = provider.build_request(&[Message::user("hi")], &params).unwrap().build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8000/v1/chat/completions");
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_openai_provider_requires_key() {
        let mut provider = OpenAiProvider::new(TransportOptions::new());
        let err = provider.init(&StaticCredentials::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredential(ProviderKind::OpenAi)));

        let params = SamplingParameters::new("gpt-4o", 32);
        let err = provider.build_request(&[], &params).unwrap_err();
        assert!(matches!(err, ClientError::NotInitialized(ProviderKind::OpenAi)));

        let provider = provider.with_api_key("sk-test");
        let request = provider.build_request(&[], &params).unwrap().build().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(request.url().as_str(), "https://api.openai.com/v1/chat/completions");
    }
}
