//! Request validation and reshaping for the upstream schema.

use serde_json::Value;

use super::types::{ChatCompletionRequest, PromptRequest, UpstreamPayload};
use crate::config::{AdapterKind, GenerationDefaults, ProviderConfig, UpstreamSchema};
use crate::error::{Error, Result};

const MISSING_FIELDS: &str = "Request body must contain \"model\" and \"messages\".";

/// Per-provider rules applied while building the upstream payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizePolicy {
    pub schema: UpstreamSchema,
    /// Server-side ceiling on `max_tokens`.
    pub max_tokens_ceiling: Option<u32>,
    pub defaults: GenerationDefaults,
    /// Set `stream: true` on chat payloads. Raw passthrough leaves the flag alone.
    pub force_stream: bool,
}

impl From<&ProviderConfig> for NormalizePolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            schema: config.schema,
            max_tokens_ceiling: config.max_tokens,
            defaults: config.defaults.clone(),
            force_stream: config.kind != AdapterKind::Raw,
        }
    }
}

/// Parse and validate a raw client body.
///
/// Rejects empty bodies, non-JSON, non-object JSON, and bodies whose `model`
/// or `messages` are missing or empty.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatCompletionRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::BadRequest(
            "No JSON body received from the client.".to_string(),
        ));
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::BadRequest(format!("Request body is not valid JSON: {}", e)))?;

    let object = value.as_object().ok_or_else(|| {
        Error::BadRequest("Request body must be a JSON object.".to_string())
    })?;

    let has_model = object
        .get("model")
        .and_then(Value::as_str)
        .is_some_and(|m| !m.trim().is_empty());
    let has_messages = object
        .get("messages")
        .and_then(Value::as_array)
        .is_some_and(|m| !m.is_empty());
    if !has_model || !has_messages {
        return Err(Error::BadRequest(MISSING_FIELDS.to_string()));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::BadRequest(format!("Invalid request body: {}", e)))
}

/// Turn a validated request into the payload the upstream expects.
pub fn normalize(request: ChatCompletionRequest, policy: &NormalizePolicy) -> Result<UpstreamPayload> {
    match policy.schema {
        UpstreamSchema::Chat => Ok(UpstreamPayload::Chat(shape_chat(request, policy))),
        UpstreamSchema::Prompt => shape_prompt(request, policy).map(UpstreamPayload::Prompt),
    }
}

fn shape_chat(mut request: ChatCompletionRequest, policy: &NormalizePolicy) -> ChatCompletionRequest {
    request.temperature = request.temperature.or(policy.defaults.temperature);
    request.top_p = request.top_p.or(policy.defaults.top_p);
    request.max_tokens = cap_max_tokens(
        request.max_tokens.or(policy.defaults.max_tokens),
        policy.max_tokens_ceiling,
    );

    if let Some(ceiling) = policy.max_tokens_ceiling {
        // Newer OpenAI-style clients send this instead of max_tokens.
        if let Some(value) = request.extra.get_mut("max_completion_tokens") {
            if value.as_u64().is_some_and(|v| v > u64::from(ceiling)) {
                *value = Value::from(ceiling);
            }
        }
    }

    if policy.force_stream {
        request.stream = Some(true);
    }
    request
}

fn shape_prompt(request: ChatCompletionRequest, policy: &NormalizePolicy) -> Result<PromptRequest> {
    let last = request.last_message().ok_or_else(|| {
        Error::BadRequest("Cannot build a prompt from an empty message list.".to_string())
    })?;
    let prompt = last
        .text()
        .ok_or_else(|| {
            Error::BadRequest(
                "The last message must have string content to build a prompt.".to_string(),
            )
        })?
        .to_string();

    Ok(PromptRequest {
        model: request.model,
        prompt,
        stream: true,
        temperature: request.temperature.or(policy.defaults.temperature),
        top_p: request.top_p.or(policy.defaults.top_p),
        max_tokens: cap_max_tokens(
            request.max_tokens.or(policy.defaults.max_tokens),
            policy.max_tokens_ceiling,
        ),
    })
}

/// A ceiling both caps a larger client value and fills in a missing one.
fn cap_max_tokens(requested: Option<u32>, ceiling: Option<u32>) -> Option<u32> {
    match (requested, ceiling) {
        (Some(requested), Some(ceiling)) => Some(requested.min(ceiling)),
        (None, ceiling) => ceiling,
        (requested, None) => requested,
    }
}
