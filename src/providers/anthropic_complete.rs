//! Anthropic legacy text completion API (`/v1/complete`).
//!
//! The conversation is flattened into a single `Human:`/`Assistant:` prompt,
//! and every streamed event carries the whole completion generated so far.
//! A non-null `stop_reason` ends the stream; `[DONE]` is not authoritative.

use async_trait::async_trait;
use itertools::Itertools;
use reqwest::header::HeaderValue;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::iter;
use tracing::{debug, warn};

use crate::accumulator::Delta;
use crate::client::{ClientError, StreamingProvider};
use crate::credentials::{resolve_api_key, CredentialProvider};
use crate::http::event_stream_request;
use crate::model::{CompletionResult, Message, Role, StopReason};
use crate::options::{SamplingParameters, SecretString, TransportOptions};
use crate::providers::{ensure_streaming, ProviderKind};
use crate::session::{StreamCallbacks, StreamSession};

/// Marker opening a human turn.
pub const HUMAN_PROMPT: &str = "\n\nHuman:";
/// Marker opening an assistant turn.
pub const AI_PROMPT: &str = "\n\nAssistant:";
/// Appended to a system message sent as a human turn.
pub const SYSTEM_PROMPT_SUFFIX: &str = " Follow these instructions for the rest of the conversation.";

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Flatten role-tagged messages into a completion prompt.
///
/// System and user messages become human turns (system ones followed by
/// [`SYSTEM_PROMPT_SUFFIX`]), assistant messages become assistant turns, and
/// a trailing [`AI_PROMPT`] asks the model for the next turn.
///
/// # Example
/// ```
/// use chatstream::model::Message;
/// use chatstream::providers::anthropic_complete::flatten_prompt;
///
/// let prompt = flatten_prompt(&[Message::user("Hello")]);
/// assert_eq!(prompt, "\n\nHuman: Hello\n\nAssistant:");
/// ```
pub fn flatten_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| match message.role {
            Role::System => format!("{HUMAN_PROMPT} {}{SYSTEM_PROMPT_SUFFIX}", message.content),
            Role::User => format!("{HUMAN_PROMPT} {}", message.content),
            Role::Assistant => format!("{AI_PROMPT} {}", message.content),
        })
        .chain(iter::once(AI_PROMPT.to_string()))
        .join("")
}

/// Split a flattened prompt back into role-tagged messages.
///
/// Inverse of [`flatten_prompt`] for content that does not itself contain a
/// turn marker. The trailing empty assistant turn is dropped.
pub fn parse_prompt(prompt: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut role = None;
    let mut rest = prompt;

    loop {
        let next = [(HUMAN_PROMPT, Role::User), (AI_PROMPT, Role::Assistant)]
            .into_iter()
            .filter_map(|(marker, role)| rest.find(marker).map(|pos| (pos, marker, role)))
            .min_by_key(|(pos, ..)| *pos);

        let body = &rest[..next.map_or(rest.len(), |(pos, ..)| pos)];
        if let Some(role) = role {
            push_turn(&mut messages, role, body);
        }

        match next {
            Some((pos, marker, next_role)) => {
                role = Some(next_role);
                rest = &rest[pos + marker.len()..];
            }
            None => break,
        }
    }
    messages
}

fn push_turn(messages: &mut Vec<Message>, role: Role, body: &str) {
    // Every flattened turn has a space after its marker; a bare marker is the
    // generation prompt.
    let Some(content) = body.strip_prefix(' ') else {
        return;
    };

    match (role, content.strip_suffix(SYSTEM_PROMPT_SUFFIX)) {
        (Role::User, Some(system)) => messages.push(Message::system(system)),
        _ => messages.push(Message::new(role, content)),
    }
}

/// Client for the legacy completion endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicCompleteProvider {
    api_key: Option<SecretString>,
    transport_options: TransportOptions,
}

impl AnthropicCompleteProvider {
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
            .ok_or(ClientError::NotInitialized(ProviderKind::AnthropicComplete))?;
        ensure_streaming(params)?;

        let url = format!("{}/v1/complete", self.transport_options.base_url_or(DEFAULT_API_BASE));
        let request_body = CompleteRequest::from((messages, params));
        debug!(model = %params.model, prompt_len = request_body.prompt.len(), "building completion request");

        let api_key = HeaderValue::from_str(api_key.expose_secret())
            .map_err(|_| ClientError::Config("Invalid API key".to_string()))?;

        Ok(event_stream_request(&self.transport_options, &url)?
            .header("x-api-key", api_key)
            .json(&request_body))
    }
}

#[async_trait]
impl StreamingProvider for AnthropicCompleteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AnthropicComplete
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

impl From<(&[Message], &SamplingParameters)> for CompleteRequest {
    fn from((messages, params): (&[Message], &SamplingParameters)) -> Self {
        let stop_sequences = if params.stop_sequences.is_empty() {
            vec![HUMAN_PROMPT.to_string()]
        } else {
            params.stop_sequences.clone()
        };

        CompleteRequest {
            prompt: flatten_prompt(messages),
            model: params.model.clone(),
            max_tokens_to_sample: params.max_tokens,
            stop_sequences,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            stream: true,
        }
    }
}

/// Decode one streamed payload.
pub(crate) fn decode_event(payload: &str) -> Result<Delta, serde_json::Error> {
    let event: CompletionEvent = serde_json::from_str(payload)?;
    Ok(event.into())
}

impl From<CompletionEvent> for Delta {
    fn from(event: CompletionEvent) -> Self {
        if let Some(exception) = &event.exception {
            warn!(exception = %exception, "completion event carried an exception");
        }
        if event.truncated {
            debug!("completion was truncated");
        }

        let delta = Delta {
            stop_sequence: event.stop,
            request_id: event.log_id,
            ..Delta::cumulative(event.completion)
        };

        match event.stop_reason.as_deref() {
            None => delta,
            Some("stop_sequence") => delta.finish(Some(StopReason::StopSequence)),
            Some("max_tokens") => delta.finish(Some(StopReason::MaxTokens)),
            Some(_) => delta.finish(Some(StopReason::EndTurn)),
        }
    }
}

// --- Completion API Request/Response Types ---

#[derive(Debug, Clone, Serialize)]
struct CompleteRequest {
    prompt: String,
    model: String,
    max_tokens_to_sample: u32,
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionEvent {
    completion: String,
    stop: Option<String>,
    stop_reason: Option<String>,
    #[serde(default)]
    truncated: bool,
    exception: Option<String>,
    log_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::TextUpdate;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are terse."),
            Message::user("What is Rust?"),
            Message::assistant("A language."),
            Message::user("Say more."),
        ]
    }

    #[test]
    fn test_flatten_prompt() {
        assert_eq!(
            flatten_prompt(&conversation()),
            "\n\nHuman: You are terse. Follow these instructions for the rest of the conversation.\
             \n\nHuman: What is Rust?\
             \n\nAssistant: A language.\
             \n\nHuman: Say more.\
             \n\nAssistant:"
        );
        assert_eq!(flatten_prompt(&[]), AI_PROMPT);
    }

    #[test]
    fn test_parse_prompt_inverts_flatten() {
        let messages = conversation();
        assert_eq!(parse_prompt(&flatten_prompt(&messages)), messages);

        let with_empty = vec![Message::user("hi"), Message::assistant("")];
        assert_eq!(parse_prompt(&flatten_prompt(&with_empty)), with_empty);
    }

    #[test]
    fn test_request_body() {
        let params = SamplingParameters::new("claude-2.1", 256).with_temperature(0.5);
        let body = serde_json::to_value(CompleteRequest::from((&conversation()[1..2], &params))).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "prompt": "\n\nHuman: What is Rust?\n\nAssistant:",
                "model": "claude-2.1",
                "max_tokens_to_sample": 256,
                "stop_sequences": ["\n\nHuman:"],
                "temperature": 0.5,
                "stream": true,
            })
        );
    }

    #[test]
    fn test_request_keeps_configured_stop_sequences() {
        let params = SamplingParameters::new("claude-2.1", 16).with_stop_sequences(vec!["END".to_string()]);
        let empty: &[Message] = &[];
        let body = CompleteRequest::from((empty, &params));
        assert_eq!(body.stop_sequences, vec!["END"]);
    }

    #[test]
    fn test_decode_event() {
        let delta = decode_event(
            r#"{"completion":" Hello","stop":null,"stop_reason":null,"truncated":false,"exception":null,"log_id":"abc"}"#,
        )
        .unwrap();
        assert_eq!(delta.text, TextUpdate::Cumulative(" Hello".to_string()));
        assert!(!delta.finished);
        assert_eq!(delta.request_id.as_deref(), Some("abc"));

        let delta = decode_event(r#"{"completion":" Hello!","stop_reason":"max_tokens"}"#).unwrap();
        assert!(delta.finished);
        assert_eq!(delta.stop_reason, Some(StopReason::MaxTokens));

        assert!(decode_event(r#"{"stop_reason":null}"#).is_err());
    }

    #[test]
    fn test_build_request_requires_init() {
        let provider = AnthropicCompleteProvider::new(TransportOptions::new());
        let params = SamplingParameters::new("claude-2.1", 16);
        let err = provider.build_request(&conversation(), &params).unwrap_err();
        assert!(matches!(err, ClientError::NotInitialized(ProviderKind::AnthropicComplete)));
    }

    #[test]
    fn test_build_request_rejects_unusable_key() {
        let provider = AnthropicCompleteProvider::new(TransportOptions::new()).with_api_key("sk-ant\n");
        let params = SamplingParameters::new("claude-2.1", 16);
        let err = provider.build_request(&conversation(), &params).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_build_request_headers() {
        let provider = AnthropicCompleteProvider::new(TransportOptions::new()).with_api_key("sk-ant");
        let params = SamplingParameters::new("claude-2.1", 16);
        let request = provider.build_request(&conversation(), &params).unwrap().build().unwrap();

        assert_eq!(request.url().as_str(), "https://api.anthropic.com/v1/complete");
        assert_eq!(request.headers()["x-api-key"], "sk-ant");
        assert_eq!(request.headers()["accept"], "text/event-stream");
    }
}
