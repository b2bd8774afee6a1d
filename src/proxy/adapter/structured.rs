//! Adapter for upstreams whose JSON events carry a text delta.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use super::{Framing, OpenedStream, ProviderAdapter, UpstreamClient, UpstreamUnit};
use crate::config::AdapterKind;
use crate::credentials::ProviderCredentials;
use crate::error::Result;
use crate::proxy::stream::{decode_events, LineFormat};
use crate::proxy::types::UpstreamPayload;

/// Extracts the delta text at a fixed JSON pointer from each upstream event.
///
/// Events are read as SSE unless the upstream answers with a JSON or NDJSON
/// content type, in which case each line is one event.
#[derive(Debug, Clone)]
pub struct StructuredDeltaAdapter {
    upstream: UpstreamClient,
    content_path: String,
}

impl StructuredDeltaAdapter {
    pub fn new(upstream: UpstreamClient, content_path: impl Into<String>) -> Self {
        Self {
            upstream,
            content_path: content_path.into(),
        }
    }
}

/// Text at `path` in a JSON event, or an empty string when there is none.
pub fn extract_content(event: &str, path: &str) -> String {
    match serde_json::from_str::<Value>(event) {
        Ok(value) => value
            .pointer(path)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Upstream event is not JSON; relaying empty delta");
            String::new()
        }
    }
}

#[async_trait]
impl ProviderAdapter for StructuredDeltaAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Structured
    }

    async fn open(
        &self,
        payload: &UpstreamPayload,
        credentials: &ProviderCredentials,
    ) -> Result<OpenedStream> {
        let response = self
            .upstream
            .send(payload, credentials, Some("text/event-stream"))
            .await?;

        let format = LineFormat::from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        tracing::debug!(
            provider = %credentials.provider,
            format = ?format,
            "Decoding structured upstream body"
        );

        let path = self.content_path.clone();
        let units = decode_events(response.bytes_stream(), format)
            .map(move |event| event.map(|data| UpstreamUnit::Delta(extract_content(&data, &path))))
            .boxed();

        Ok(OpenedStream {
            framing: Framing::Sse,
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONTENT_PATH;

    #[test]
    fn extracts_first_choice_delta() {
        let event = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"}},{"index":1,"delta":{"content":"no"}}]}"#;
        assert_eq!(extract_content(event, DEFAULT_CONTENT_PATH), "Hi");
    }

    #[test]
    fn missing_content_is_empty() {
        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(extract_content(role_only, DEFAULT_CONTENT_PATH), "");

        let no_choices = r#"{"choices":[],"usage":{"prompt_tokens":3}}"#;
        assert_eq!(extract_content(no_choices, DEFAULT_CONTENT_PATH), "");

        let null_content = r#"{"choices":[{"delta":{"content":null}}]}"#;
        assert_eq!(extract_content(null_content, DEFAULT_CONTENT_PATH), "");
    }

    #[test]
    fn non_json_event_is_empty() {
        assert_eq!(extract_content("not json", DEFAULT_CONTENT_PATH), "");
    }

    #[test]
    fn custom_path_for_completion_style_upstreams() {
        let event = r#"{"choices":[{"text":"tok"}]}"#;
        assert_eq!(extract_content(event, "/choices/0/text"), "tok");
    }
}
