//! Provider adapters.
//!
//! An adapter owns the wire contract with one kind of upstream: how to call
//! it and how to cut its response body into [`UpstreamUnit`]s. Which adapter
//! a provider uses is chosen by its configured [`AdapterKind`].
//!
//! Opening a stream either fails with a structured error (nothing has been
//! sent to the client yet) or returns an [`OpenedStream`] whose units are
//! pulled lazily, one at a time, by the relay.

mod http;
mod raw;
mod sse;
mod structured;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use http::UpstreamClient;
pub use raw::{RawByteAdapter, RAW_BLOCK_SIZE};
pub use sse::SsePassthroughAdapter;
pub use structured::{extract_content, StructuredDeltaAdapter};

use super::types::UpstreamPayload;
use crate::config::{AdapterKind, ProviderConfig};
use crate::credentials::ProviderCredentials;
use crate::error::Result;

/// Content type of every SSE-framed client response.
pub const SSE_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

/// Fallback when a raw upstream does not declare a content type.
pub const DEFAULT_RAW_CONTENT_TYPE: &str = "application/octet-stream";

/// One atomic piece of upstream output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamUnit {
    /// Text extracted from a structured delta. May be empty.
    Delta(String),
    /// Body of one SSE event, forwarded as-is.
    Event(String),
    /// A block of raw bytes.
    Bytes(Bytes),
}

/// How frames are written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// `data: <payload>\n\n` frames closed by `data: [DONE]\n\n`.
    Sse,
    /// Verbatim bytes with the upstream's content type, no terminal marker.
    Raw { content_type: String },
}

impl Framing {
    pub fn content_type(&self) -> &str {
        match self {
            Framing::Sse => SSE_CONTENT_TYPE,
            Framing::Raw { content_type } => content_type,
        }
    }
}

/// Lazy, finite, single-use sequence of upstream units.
pub type UnitStream = BoxStream<'static, Result<UpstreamUnit>>;

/// An upstream response that has passed its status check.
pub struct OpenedStream {
    pub framing: Framing,
    pub units: UnitStream,
}

impl std::fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Perform the authenticated upstream call.
    ///
    /// Returns [`crate::Error::UpstreamRejected`] when the upstream answers
    /// with a non-success status, before any unit is produced.
    async fn open(
        &self,
        payload: &UpstreamPayload,
        credentials: &ProviderCredentials,
    ) -> Result<OpenedStream>;
}

/// Build the adapter matching a provider's configured kind.
pub fn build_adapter(
    config: &ProviderConfig,
    client: reqwest::Client,
    first_byte_timeout: Duration,
) -> Arc<dyn ProviderAdapter> {
    let upstream = UpstreamClient::new(client, config.url.clone(), first_byte_timeout);
    match config.kind {
        AdapterKind::Structured => Arc::new(StructuredDeltaAdapter::new(
            upstream,
            config.content_path.clone(),
        )),
        AdapterKind::Sse => Arc::new(SsePassthroughAdapter::new(upstream)),
        AdapterKind::Raw => Arc::new(RawByteAdapter::new(upstream)),
    }
}
