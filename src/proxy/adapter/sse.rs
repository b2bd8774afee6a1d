//! Adapter for upstreams that already speak SSE.

use async_trait::async_trait;
use futures::StreamExt;

use super::{Framing, OpenedStream, ProviderAdapter, UpstreamClient, UpstreamUnit};
use crate::config::AdapterKind;
use crate::credentials::ProviderCredentials;
use crate::error::Result;
use crate::proxy::stream::decode_sse;
use crate::proxy::types::UpstreamPayload;

/// Forwards each upstream event body unchanged.
///
/// The upstream's own `[DONE]` ends the unit stream; the relay writes the
/// client's terminal marker itself so exactly one is ever sent.
#[derive(Debug, Clone)]
pub struct SsePassthroughAdapter {
    upstream: UpstreamClient,
}

impl SsePassthroughAdapter {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl ProviderAdapter for SsePassthroughAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Sse
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

        let units = decode_sse(response.bytes_stream())
            .map(|event| event.map(UpstreamUnit::Event))
            .boxed();

        Ok(OpenedStream {
            framing: Framing::Sse,
            units,
        })
    }
}
