//! Configuration parsing and validation for chatrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Provider used by `POST /api/proxy` when no provider is named in the path.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Ceiling on the wait for upstream response headers.
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_secs: u64,
    /// Ceiling on the idle time between two reads of an upstream body.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Largest client request body accepted on the relay routes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_first_byte_timeout() -> u64 {
    300
}

fn default_read_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            default_provider: None,
            first_byte_timeout_secs: default_first_byte_timeout(),
            read_timeout_secs: default_read_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_secs(self.first_byte_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The raw value is only reachable through [`ApiKey::expose_secret`], so every
/// place that touches it shows up in `grep expose_secret`.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Wire behavior of an upstream, selecting the adapter that talks to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// JSON events whose text delta is extracted and re-emitted.
    Structured,
    /// SSE events forwarded as-is.
    Sse,
    /// Bytes forwarded verbatim with the upstream content type.
    Raw,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::Structured => write!(f, "structured"),
            AdapterKind::Sse => write!(f, "sse"),
            AdapterKind::Raw => write!(f, "raw"),
        }
    }
}

/// Request body shape the upstream expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamSchema {
    /// Same `{model, messages, ...}` body the client sends.
    #[default]
    Chat,
    /// Single `prompt` string built from the last message.
    Prompt,
}

impl std::fmt::Display for UpstreamSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamSchema::Chat => write!(f, "chat"),
            UpstreamSchema::Prompt => write!(f, "prompt"),
        }
    }
}

/// Generation parameters applied when the client leaves them out.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GenerationDefaults {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

pub const DEFAULT_CONTENT_PATH: &str = "/choices/0/delta/content";

fn default_content_path() -> String {
    DEFAULT_CONTENT_PATH.to_string()
}

/// Provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique name for this provider
    pub name: String,
    pub kind: AdapterKind,
    /// Full URL of the upstream completion endpoint
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Sent as `HTTP-Referer`
    #[serde(default)]
    pub referer: Option<String>,
    /// Sent as `X-Title`
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub schema: UpstreamSchema,
    /// Server-side ceiling on `max_tokens`
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// JSON pointer to the delta text (structured adapters only)
    #[serde(default = "default_content_path")]
    pub content_path: String,
    #[serde(default)]
    pub defaults: GenerationDefaults,
}

impl ProviderConfig {
    /// Minimal provider with every optional field at its default.
    pub fn new(name: impl Into<String>, kind: AdapterKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            api_key: None,
            referer: None,
            title: None,
            schema: UpstreamSchema::Chat,
            max_tokens: None,
            content_path: default_content_path(),
            defaults: GenerationDefaults::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<ApiKey>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string.
    ///
    /// Keys go through the same `${VAR}` expansion and convention lookup as
    /// [`Config::from_file_with_env`].
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with_env(content).map(|(config, _)| config)
    }

    fn parse_str_with_env(content: &str) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;
        Ok((config, key_sources))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            tracing::warn!("No providers configured - proxy will reject all requests");
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Provider with empty name".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' is defined more than once",
                    provider.name
                )));
            }
            if provider.url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty URL",
                    provider.name
                )));
            }
            if provider.max_tokens == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has max_tokens = 0",
                    provider.name
                )));
            }
            if provider.kind == AdapterKind::Structured && !provider.content_path.starts_with('/')
            {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' content_path must be a JSON pointer starting with '/'",
                    provider.name
                )));
            }
        }

        if let Some(default) = &self.server.default_provider {
            if !seen.contains(default.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "default_provider '{}' is not a configured provider",
                    default
                )));
            }
        }

        let server = &self.server;
        if server.first_byte_timeout_secs == 0
            || server.read_timeout_secs == 0
            || server.connect_timeout_secs == 0
        {
            return Err(ConfigError::Validation(
                "Server timeouts must be greater than zero".to_string(),
            ));
        }
        if server.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw provider config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawProviderConfig {
    name: String,
    kind: AdapterKind,
    url: String,
    api_key: Option<String>,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    schema: UpstreamSchema,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default = "default_content_path")]
    content_path: String,
    #[serde(default)]
    defaults: GenerationDefaults,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    server: ServerConfig,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: "Unclosed '${' in api_key value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var name for a provider.
///
/// - "openrouter" -> "CHATRELAY_OPENROUTER_API_KEY"
/// - "cerebras-fast" -> "CHATRELAY_CEREBRAS_FAST_API_KEY"
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("CHATRELAY_{}_API_KEY", upper_snake)
}

fn convention_key_lookup(provider_name: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(provider_name);
    std::env::var(&var_name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(|value| (var_name, value))
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - `api_key` containing `${VAR}`: expanded from environment, `EnvExpanded`
    /// - literal `api_key`: wrapped directly, `Literal`
    /// - no `api_key`: convention lookup (`CHATRELAY_<NAME>_API_KEY`), else `None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut providers = Vec::with_capacity(raw.providers.len());
        let mut key_sources = Vec::with_capacity(raw.providers.len());

        for rp in raw.providers {
            let (api_key, source) = match rp.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rp.name)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rp.name) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((rp.name.clone(), source));

            providers.push(ProviderConfig {
                name: rp.name,
                kind: rp.kind,
                url: rp.url,
                api_key,
                referer: rp.referer,
                title: rp.title,
                schema: rp.schema,
                max_tokens: rp.max_tokens,
                content_path: rp.content_path,
                defaults: rp.defaults,
            });
        }

        let config = Config {
            server: raw.server,
            providers,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = read_config_file(path.as_ref())?;
        Self::parse_str_with_env(&content)
    }
}
