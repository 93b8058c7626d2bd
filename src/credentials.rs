//! API key lookup.
//!
//! Prompting for and persisting keys is the embedding application's job: it
//! implements [`CredentialProvider`] on top of whatever secret store it has.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::client::ClientError;
use crate::options::SecretString;
use crate::providers::ProviderKind;

/// Source of API keys, keyed by provider.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Look up the key for `provider`, returning `Ok(None)` when there is none.
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<SecretString>, ClientError>;
}

/// Reads keys from the environment variable named by [`ProviderKind::api_key_env`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<SecretString>, ClientError> {
        Ok(std::env::var(provider.api_key_env())
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from))
    }
}

/// Fixed in-memory keys.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<ProviderKind, SecretString>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: ProviderKind, key: impl Into<SecretString>) -> Self {
        self.keys.insert(provider, key.into());
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn api_key(&self, provider: ProviderKind) -> Result<Option<SecretString>, ClientError> {
        Ok(self.keys.get(&provider).cloned())
    }
}

/// Resolve the key for `provider`, failing if one is required but missing.
pub(crate) async fn resolve_api_key(
    credentials: &dyn CredentialProvider,
    provider: ProviderKind,
) -> Result<Option<SecretString>, ClientError> {
    match credentials.api_key(provider).await? {
        Some(key) => Ok(Some(key)),
        None if provider.requires_api_key() => Err(ClientError::MissingCredential(provider)),
        None => Ok(None),
    }
}
