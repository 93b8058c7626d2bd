//! Conversation handle tying a history to a provider.

use tracing::debug;

use crate::client::{ClientError, StreamingProvider};
use crate::config::ChatConfig;
use crate::credentials::CredentialProvider;
use crate::model::{CompletionResult, Conversation};
use crate::options::SamplingParameters;
use crate::providers::Provider;
use crate::session::StreamCallbacks;

/// A running chat: the message history plus the backend answering it.
///
/// The user turn is appended before a request is sent and the assistant turn
/// only once the stream reaches a stop reason, so a failed request leaves the
/// unanswered question at the end of the history.
#[derive(Debug)]
pub struct Chat {
    provider: Provider,
    params: SamplingParameters,
    system_prompt: String,
    conversation: Conversation,
}

impl Chat {
    pub fn new(provider: Provider, params: SamplingParameters, system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            provider,
            params,
            conversation: Conversation::new(system_prompt.as_str()),
            system_prompt,
        }
    }

    /// Validate `config`, build its provider and resolve credentials.
    pub async fn from_config(
        config: &ChatConfig,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, ClientError> {
        let params = config.sampling_parameters()?;
        let mut provider = Provider::new(config.provider_kind()?, config.transport_options()?);
        provider.init(credentials).await?;
        debug!(provider = %provider.kind(), model = %params.model, "chat ready");
        Ok(Self::new(provider, params, config.system_prompt()))
    }

    /// Ask `text` and stream the answer through `callbacks`.
    pub async fn send(
        &mut self,
        text: impl Into<String>,
        callbacks: StreamCallbacks<'_>,
    ) -> Result<CompletionResult, ClientError> {
        self.conversation.push_user(text);
        let result = self
            .provider
            .complete_stream(self.conversation.messages(), &self.params, callbacks)
            .await?;
        self.conversation.push_assistant(result.text.as_str());
        Ok(result)
    }

    /// Start over with only the system prompt.
    pub fn reset(&mut self) {
        self.conversation.reset(self.system_prompt.as_str());
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Replace the history, e.g. with one restored by [`Conversation::from_json`].
    pub fn restore(&mut self, conversation: Conversation) {
        self.conversation = conversation;
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn params(&self) -> &SamplingParameters {
        &self.params
    }
}
