//! Chat settings as stored by the host application.
//!
//! Every field is optional on disk; the accessors validate and turn the raw
//! settings into [`SamplingParameters`] and [`TransportOptions`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::ClientError;
use crate::model::DEFAULT_SYSTEM_PROMPT;
use crate::options::{SamplingParameters, TransportOptions};
use crate::providers::ProviderKind;

/// Raw chat settings.
///
/// # Example
/// ```
/// use chatstream::config::ChatConfig;
/// use chatstream::providers::ProviderKind;
///
/// let config = ChatConfig::from_json(r#"{"model": "gpt-4o", "maxLength": 256}"#).unwrap();
/// assert_eq!(config.provider_kind().unwrap(), ProviderKind::OpenAi);
/// assert_eq!(config.sampling_parameters().unwrap().max_tokens, 256);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatConfig {
    /// Explicit backend; inferred from `model` when absent
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    /// Token budget for one answer
    pub max_length: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
    /// Base URL override; mandatory for the custom provider
    pub server_url: Option<String>,
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
    pub proxy: Option<String>,
}

impl ChatConfig {
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    fn model(&self) -> Result<&str, ClientError> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .ok_or_else(|| ClientError::Config("no model configured".to_string()))
    }

    /// The configured provider, or the one inferred from the model id.
    pub fn provider_kind(&self) -> Result<ProviderKind, ClientError> {
        match self.provider {
            Some(kind) => Ok(kind),
            None => Ok(ProviderKind::from_model(self.model()?)),
        }
    }

    pub fn sampling_parameters(&self) -> Result<SamplingParameters, ClientError> {
        let model = self.model()?;
        let max_tokens = match self.max_length {
            Some(0) => return Err(ClientError::Config("maxLength must be greater than zero".to_string())),
            Some(max_length) => max_length,
            None => return Err(ClientError::Config("no maxLength configured".to_string())),
        };

        let mut params = SamplingParameters::new(model, max_tokens)
            .with_stop_sequences(self.stop_sequences.clone());
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ClientError::Config(format!(
                    "temperature {temperature} is outside 0.0..=2.0"
                )));
            }
            params = params.with_temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            params = params.with_top_p(top_p);
        }
        if let Some(top_k) = self.top_k {
            params = params.with_top_k(top_k);
        }
        Ok(params)
    }

    pub fn transport_options(&self) -> Result<TransportOptions, ClientError> {
        let server_url = self.server_url.as_deref().map(str::trim).filter(|url| !url.is_empty());
        if server_url.is_none() && self.provider_kind()? == ProviderKind::Custom {
            return Err(ClientError::Config(
                "serverUrl is required for the custom provider".to_string(),
            ));
        }

        let mut options = TransportOptions::new();
        if let Some(url) = server_url {
            options = options.with_base_url(url);
        }
        if let Some(secs) = self.timeout_secs {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        if let Some(proxy) = &self.proxy {
            options = options.with_proxy(proxy.as_str());
        }
        Ok(options)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}
