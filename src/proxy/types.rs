//! Client-facing request types and upstream payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat completion request as sent by the client (OpenAI-compatible).
///
/// Fields the relay does not interpret are kept in `extra` so a chat-schema
/// upstream receives them untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chat message.
///
/// `content` is kept as raw JSON: a plain string, or an array of content
/// parts for multimodal clients.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }

    /// Content when it is a plain string.
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

impl ChatCompletionRequest {
    /// Minimal request with no generation parameters set.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stream: None,
            extra: Map::new(),
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Body for upstreams that take a single prompt string.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PromptRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// The body actually sent upstream.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UpstreamPayload {
    Chat(ChatCompletionRequest),
    Prompt(PromptRequest),
}

impl UpstreamPayload {
    pub fn model(&self) -> &str {
        match self {
            UpstreamPayload::Chat(request) => &request.model,
            UpstreamPayload::Prompt(request) => &request.model,
        }
    }
}

/// Normalized streaming chunk emitted for structured-delta upstreams.
///
/// Shaped like an OpenAI chunk so clients read `choices[0].delta.content`
/// regardless of which upstream produced the text.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaChunk<'a> {
    pub choices: [DeltaChoice<'a>; 1],
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaChoice<'a> {
    pub index: u32,
    pub delta: Delta<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delta<'a> {
    pub content: &'a str,
}

impl<'a> DeltaChunk<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            choices: [DeltaChoice {
                index: 0,
                delta: Delta { content },
            }],
        }
    }
}
