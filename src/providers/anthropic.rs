//! Anthropic Messages API client implementation.
//!
//! Streams typed events; `content_block_delta` events carry text fragments
//! and `message_stop` (or a `[DONE]` sentinel) ends the stream.
//! See: <https://docs.anthropic.com/en/api/messages-streaming>

use async_trait::async_trait;
use itertools::Itertools;
use reqwest::header::{HeaderMap, HeaderValue};
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

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Anthropic Messages client.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: Option<SecretString>,
    transport_options: TransportOptions,
}

impl AnthropicProvider {
    pub fn new(transport_options: TransportOptions) -> Self {
        Self {
            api_key: None,
            transport_options,
        }
    }

    /// Use `api_key` directly instead of resolving it in `init`.
    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn build_request(
        &self,
        messages: &[Message],
        params: &SamplingParameters,
    ) -> Result<RequestBuilder, ClientError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ClientError::NotInitialized(ProviderKind::Anthropic))?;
        ensure_streaming(params)?;

        let url = format!("{}/v1/messages", self.transport_options.base_url_or(DEFAULT_API_BASE));
        let request_body = AnthropicRequest::from((messages, params));

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.expose_secret())
                .map_err(|_| ClientError::Config("Invalid API key".to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        Ok(event_stream_request(&self.transport_options, &url)?
            .headers(headers)
            .json(&request_body))
    }
}

#[async_trait]
impl StreamingProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn init(&mut self, credentials: &dyn CredentialProvider) -> Result<(), ClientError> {
        self.api_key = resolve_api_key(credentials, self.kind()).await?;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        params: &SamplingParameters,
        callbacks: StreamCallbacks<'_>,
    ) -> Result<CompletionResult, ClientError> {
        let req = self.build_request(messages, params)?;
        StreamSession::new(self.kind(), callbacks).start(req).await
    }
}

impl<'a> From<(&'a [Message], &'a SamplingParameters)> for AnthropicRequest<'a> {
    fn from((messages, params): (&'a [Message], &'a SamplingParameters)) -> Self {
        // The Messages API takes system prompts out of band.
        let (system, turns): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.role == Role::System);

        let system = Some(system.iter().map(|m| m.content.as_str()).join("\n\n"))
            .filter(|s| !s.is_empty());

        AnthropicRequest {
            model: &params.model,
            max_tokens: params.max_tokens,
            system,
            messages: turns.into_iter().map(AnthropicMessage::from).collect(),
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: Some(params.stop_sequences.as_slice()).filter(|s| !s.is_empty()),
            stream: params.stream,
        }
    }
}

impl<'a> From<&'a Message> for AnthropicMessage<'a> {
    fn from(message: &'a Message) -> Self {
        AnthropicMessage {
            role: match message.role {
                Role::Assistant => AnthropicRole::Assistant,
                Role::User | Role::System => AnthropicRole::User,
            },
            content: &message.content,
        }
    }
}

/// Decode one streamed payload.
pub(crate) fn decode_event(payload: &str) -> Result<Delta, serde_json::Error> {
    let event: AnthropicStreamEvent = serde_json::from_str(payload)?;
    Ok(event.into())
}

impl From<AnthropicStreamEvent> for Delta {
    fn from(event: AnthropicStreamEvent) -> Self {
        match event {
            AnthropicStreamEvent::MessageStart { message } => Delta {
                request_id: message.id,
                ..Delta::default()
            },
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                delta.text.map(Delta::fragment).unwrap_or_default()
            }
            AnthropicStreamEvent::MessageDelta { delta } => Delta {
                stop_reason: delta.stop_reason.as_deref().and_then(stop_reason),
                stop_sequence: delta.stop_sequence,
                ..Delta::default()
            },
            AnthropicStreamEvent::MessageStop => Delta::default().finish(None),
            AnthropicStreamEvent::Error { error } => Delta {
                error: Some(format!("{}: {}", error.error_type, error.message)),
                ..Delta::default()
            },
            AnthropicStreamEvent::Other => Delta::default(),
        }
    }
}

fn stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" => Some(StopReason::EndTurn),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        _ => None,
    }
}

// --- Anthropic API Request/Response Types ---

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
    stream: bool,
}

#[derive(Debug, Copy, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum AnthropicRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage<'a> {
    role: AnthropicRole,
    content: &'a str,
}

// --- Anthropic Streaming Response Types ---

/// Streaming event types from Anthropic
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart { message: MessageStart },
    ContentBlockDelta { delta: ContentDelta },
    MessageDelta { delta: MessageDeltaBody },
    MessageStop,
    Error { error: AnthropicError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageStart {
    id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentDelta {
    /// Absent for non-text deltas such as `input_json_delta`.
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
    stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::TextUpdate;

    #[test]
    fn test_request_lifts_system_prompt() {
        let messages = vec![
            Message::system("Be brief."),
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("Bye"),
        ];
        let params = SamplingParameters::new("claude-3-5-haiku-latest", 512).with_top_k(5);
        let body = serde_json::to_value(AnthropicRequest::from((&messages[..], &params))).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "model": "claude-3-5-haiku-latest",
                "max_tokens": 512,
                "system": "Be brief.",
                "messages": [
                    {"role": "user", "content": "Hi"},
                    {"role": "assistant", "content": "Hello!"},
                    {"role": "user", "content": "Bye"},
                ],
                "top_k": 5,
                "stream": true,
            })
        );
    }

    #[test]
    fn test_decode_content_block_delta() {
        let delta = decode_event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"foo"}}"#,
        )
        .unwrap();
        assert_eq!(delta.text, TextUpdate::Fragment("foo".to_string()));

        let delta = decode_event(r#"{"type":"content_block_delta","delta":{"text":"bar"}}"#).unwrap();
        assert_eq!(delta.text, TextUpdate::Fragment("bar".to_string()));

        let delta = decode_event(
            r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#,
        )
        .unwrap();
        assert_eq!(delta.text, TextUpdate::None);
    }

    #[test]
    fn test_decode_lifecycle_events() {
        let start = decode_event(r#"{"type":"message_start","message":{"id":"msg_01","role":"assistant"}}"#).unwrap();
        assert_eq!(start.request_id.as_deref(), Some("msg_01"));

        let stop = decode_event(
            r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens","stop_sequence":null},"usage":{"output_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(stop.stop_reason, Some(StopReason::MaxTokens));
        assert!(!stop.finished);

        assert!(decode_event(r#"{"type":"message_stop"}"#).unwrap().finished);
        assert_eq!(decode_event(r#"{"type":"ping"}"#).unwrap(), Delta::default());
    }

    #[test]
    fn test_decode_error_event() {
        let delta = decode_event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap();
        assert_eq!(delta.error.as_deref(), Some("overloaded_error: Overloaded"));
    }

    #[test]
    fn test_build_request_headers() {
        let provider = AnthropicProvider::new(TransportOptions::new().with_base_url("http://localhost:9000/"))
            .with_api_key("sk-ant");
        let params = SamplingParameters::new("claude-3-5-haiku-latest", 16);
        let request = provider
            .build_request(&[Message::user("hi")], &params)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "http://localhost:9000/v1/messages");
        assert_eq!(request.headers()["x-api-key"], "sk-ant");
        assert_eq!(request.headers()["anthropic-version"], ANTHROPIC_VERSION);
    }
}
