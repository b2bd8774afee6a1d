//! Provider lookup by name.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AdapterKind, Config, ProviderConfig, UpstreamSchema};
use crate::error::{Error, Result};
use crate::proxy::adapter::{build_adapter, ProviderAdapter};
use crate::proxy::normalize::NormalizePolicy;

/// A provider ready to serve requests.
#[derive(Clone)]
pub struct SelectedProvider {
    pub name: String,
    pub kind: AdapterKind,
    pub schema: UpstreamSchema,
    pub policy: NormalizePolicy,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl SelectedProvider {
    pub fn from_config(
        config: &ProviderConfig,
        client: reqwest::Client,
        first_byte_timeout: Duration,
    ) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            schema: config.schema,
            policy: NormalizePolicy::from(config),
            adapter: build_adapter(config, client, first_byte_timeout),
        }
    }

    /// Provider backed by an arbitrary adapter.
    pub fn with_adapter(
        name: impl Into<String>,
        policy: NormalizePolicy,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: adapter.kind(),
            schema: policy.schema,
            policy,
            adapter,
        }
    }
}

impl std::fmt::Debug for SelectedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedProvider")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("schema", &self.schema)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Immutable set of providers built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<SelectedProvider>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<SelectedProvider>, default_provider: Option<String>) -> Self {
        Self {
            providers,
            default_provider,
        }
    }

    /// Build one adapter per configured provider, all sharing `client`.
    pub fn from_config(config: &Config, client: &reqwest::Client) -> Self {
        let first_byte_timeout = config.server.first_byte_timeout();
        let providers = config
            .providers
            .iter()
            .map(|p| SelectedProvider::from_config(p, client.clone(), first_byte_timeout))
            .collect();
        Self::new(providers, config.server.default_provider.clone())
    }

    /// Provider named `name`, or the default provider when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<&SelectedProvider> {
        let name = match name {
            Some(name) => name,
            None => self.default_provider.as_deref().ok_or_else(|| {
                tracing::error!("Request needs the default provider but none is configured");
                Error::Configuration("No default provider configured.".to_string())
            })?,
        };

        let selected = self.providers.iter().find(|p| p.name == name);
        match selected {
            Some(provider) => {
                tracing::debug!(provider = %provider.name, kind = %provider.kind, "Selected provider");
                Ok(provider)
            }
            None if self.default_provider.as_deref() == Some(name) => {
                Err(Error::Configuration(format!(
                    "Default provider '{}' is not configured.",
                    name
                )))
            }
            None => Err(Error::BadRequest(format!("Unknown provider '{}'.", name))),
        }
    }

    pub fn providers(&self) -> &[SelectedProvider] {
        &self.providers
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn config() -> Config {
        Config {
            server: ServerConfig {
                default_provider: Some("alpha".to_string()),
                ..ServerConfig::default()
            },
            providers: vec![
                ProviderConfig::new("alpha", AdapterKind::Sse, "http://127.0.0.1:9/a"),
                ProviderConfig::new("beta", AdapterKind::Raw, "http://127.0.0.1:9/b"),
            ],
            logging: Default::default(),
        }
    }

    #[test]
    fn test_select_by_name() {
        let registry = ProviderRegistry::from_config(&config(), &reqwest::Client::new());
        let beta = registry.select(Some("beta")).unwrap();
        assert_eq!(beta.name, "beta");
        assert_eq!(beta.kind, AdapterKind::Raw);
        assert!(!beta.policy.force_stream);
    }

    #[test]
    fn test_select_default() {
        let registry = ProviderRegistry::from_config(&config(), &reqwest::Client::new());
        let selected = registry.select(None).unwrap();
        assert_eq!(selected.name, "alpha");
        assert!(selected.policy.force_stream);
    }

    #[test]
    fn test_unknown_provider_is_bad_request() {
        let registry = ProviderRegistry::from_config(&config(), &reqwest::Client::new());
        let err = registry.select(Some("gamma")).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_missing_default_is_configuration_error() {
        let mut config = config();
        config.server.default_provider = None;
        let registry = ProviderRegistry::from_config(&config, &reqwest::Client::new());
        let err = registry.select(None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let registry = ProviderRegistry::new(vec![], Some("ghost".to_string()));
        let err = registry.select(None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_providers_keep_config_order() {
        let registry = ProviderRegistry::from_config(&config(), &reqwest::Client::new());
        let names: Vec<&str> = registry.providers().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(registry.default_provider(), Some("alpha"));
    }
}
