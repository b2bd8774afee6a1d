//! Per-provider credential lookup.
//!
//! Keys are resolved once when the process loads its configuration. The
//! resolver only reads that immutable snapshot, so concurrent requests never
//! touch the process environment.

use std::collections::HashMap;

use crate::config::{convention_env_var_name, ApiKey, Config};
use crate::error::{Error, Result};

/// Everything needed to authenticate against one upstream.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub provider: String,
    pub api_key: ApiKey,
    /// Sent as `HTTP-Referer`
    pub referer: Option<String>,
    /// Sent as `X-Title`
    pub title: Option<String>,
}

/// Source of provider credentials for the request path.
pub trait CredentialResolver: Send + Sync {
    /// Credentials for `provider`, or [`Error::Configuration`] when no key is
    /// available. Callers must not contact the upstream on error.
    fn resolve(&self, provider: &str) -> Result<ProviderCredentials>;

    /// Whether a key is available, without handing it out.
    fn is_configured(&self, provider: &str) -> bool;
}

#[derive(Debug, Clone)]
struct Entry {
    api_key: Option<ApiKey>,
    referer: Option<String>,
    title: Option<String>,
}

/// Resolver backed by the loaded [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentials {
    entries: HashMap<String, Entry>,
}

impl ConfigCredentials {
    pub fn from_config(config: &Config) -> Self {
        let entries = config
            .providers
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    Entry {
                        api_key: p.api_key.clone(),
                        referer: p.referer.clone(),
                        title: p.title.clone(),
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

impl CredentialResolver for ConfigCredentials {
    fn resolve(&self, provider: &str) -> Result<ProviderCredentials> {
        let entry = self.entries.get(provider).ok_or_else(|| {
            tracing::error!(provider = %provider, "No configuration entry for provider");
            Error::Configuration(format!("Provider '{}' is not configured.", provider))
        })?;

        let api_key = entry.api_key.clone().ok_or_else(|| {
            tracing::error!(
                provider = %provider,
                env_var = %convention_env_var_name(provider),
                "API key missing for provider; set api_key in config or the environment variable"
            );
            Error::Configuration(format!("Missing API key for provider '{}'.", provider))
        })?;

        Ok(ProviderCredentials {
            provider: provider.to_string(),
            api_key,
            referer: entry.referer.clone(),
            title: entry.title.clone(),
        })
    }

    fn is_configured(&self, provider: &str) -> bool {
        self.entries
            .get(provider)
            .is_some_and(|entry| entry.api_key.is_some())
    }
}
