//! Stream relay: pulls units from an opened adapter stream and writes one
//! client frame per unit, in order, as soon as each unit arrives.
//!
//! State machine: `Idle -> Opening -> Streaming -> {Completed | Aborted}`,
//! with `Opening -> Aborted` when the upstream call fails. Failures while
//! opening come back as structured errors. Once streaming has started the
//! status line and headers are gone, so a failing upstream only ends the
//! body early: the client sees the stream stop without `data: [DONE]`.
//! Buffering the whole response to allow a late error body would defeat
//! streaming, so that limitation is kept.
//!
//! If the client goes away, axum drops the response body and with it the
//! relay, the adapter stream and the upstream response, which releases the
//! upstream connection. Nothing is polled after that.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};

use super::adapter::{
    Framing, ProviderAdapter, UnitStream, UpstreamUnit, DEFAULT_RAW_CONTENT_TYPE,
};
use super::types::{DeltaChunk, UpstreamPayload};
use crate::credentials::ProviderCredentials;
use crate::error::{Error, Result};

/// Terminal marker for SSE framing.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Opening,
    Streaming,
    Completed,
    Aborted,
}

/// One client-facing frame before framing is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Data(Bytes),
    Done,
}

impl ClientFrame {
    /// Translate one upstream unit.
    pub fn from_unit(unit: UpstreamUnit) -> Result<Self> {
        let payload = match unit {
            UpstreamUnit::Delta(text) => serde_json::to_vec(&DeltaChunk::new(&text))
                .map(Bytes::from)
                .map_err(|e| Error::Internal(format!("failed to encode delta: {}", e)))?,
            UpstreamUnit::Event(body) => Bytes::from(body),
            UpstreamUnit::Bytes(bytes) => bytes,
        };
        Ok(ClientFrame::Data(payload))
    }

    /// Bytes written to the client for this frame.
    pub fn encode(self, framing: &Framing) -> Bytes {
        match (self, framing) {
            (ClientFrame::Data(payload), Framing::Sse) => {
                let mut buf = BytesMut::with_capacity(payload.len() + 8);
                // Each payload line gets its own `data:` field so multi-line
                // event bodies stay one event.
                for line in payload.split(|b| *b == b'\n') {
                    buf.put_slice(b"data: ");
                    buf.put_slice(line);
                    buf.put_u8(b'\n');
                }
                buf.put_u8(b'\n');
                buf.freeze()
            }
            (ClientFrame::Data(payload), Framing::Raw { .. }) => payload,
            (ClientFrame::Done, Framing::Sse) => Bytes::from_static(DONE_FRAME),
            (ClientFrame::Done, Framing::Raw { .. }) => Bytes::new(),
        }
    }
}

/// Drives one request's upstream stream into client frames.
pub struct Relay {
    units: Option<UnitStream>,
    framing: Framing,
    state: RelayState,
    provider: String,
    request_id: String,
    frames_sent: usize,
}

impl Relay {
    pub fn new(provider: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            units: None,
            framing: Framing::Sse,
            state: RelayState::Idle,
            provider: provider.into(),
            request_id: request_id.into(),
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    /// Open the upstream stream through `adapter`.
    ///
    /// On failure the relay ends in [`RelayState::Aborted`] without having
    /// produced anything, and the error is returned for a structured response.
    pub async fn open(
        mut self,
        adapter: &dyn ProviderAdapter,
        payload: &UpstreamPayload,
        credentials: &ProviderCredentials,
    ) -> std::result::Result<Self, (Self, Error)> {
        self.transition(RelayState::Opening);
        match adapter.open(payload, credentials).await {
            Ok(opened) => {
                self.framing = opened.framing;
                self.units = Some(opened.units);
                self.transition(RelayState::Streaming);
                Ok(self)
            }
            Err(e) => {
                self.transition(RelayState::Aborted);
                Err((self, e))
            }
        }
    }

    fn transition(&mut self, next: RelayState) {
        tracing::debug!(
            request_id = %self.request_id,
            provider = %self.provider,
            from = ?self.state,
            to = ?next,
            "Relay state change"
        );
        self.state = next;
    }

    fn abort(&mut self, err: &Error) {
        tracing::warn!(
            request_id = %self.request_id,
            provider = %self.provider,
            kind = err.kind(),
            error = %err,
            frames_sent = self.frames_sent,
            "Upstream failed mid-stream; closing client stream without terminal marker"
        );
        self.units = None;
        self.transition(RelayState::Aborted);
    }

    fn complete(&mut self) {
        tracing::info!(
            request_id = %self.request_id,
            provider = %self.provider,
            frames_sent = self.frames_sent,
            "Upstream stream completed"
        );
        self.units = None;
        self.transition(RelayState::Completed);
    }
}

impl Stream for Relay {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != RelayState::Streaming {
            return Poll::Ready(None);
        }
        let Some(units) = this.units.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(units.poll_next_unpin(cx)) {
            Some(Ok(unit)) => match ClientFrame::from_unit(unit) {
                Ok(frame) => {
                    this.frames_sent += 1;
                    Poll::Ready(Some(Ok(frame.encode(&this.framing))))
                }
                Err(e) => {
                    this.abort(&e);
                    Poll::Ready(None)
                }
            },
            Some(Err(e)) => {
                this.abort(&e);
                Poll::Ready(None)
            }
            None => {
                this.complete();
                match this.framing {
                    Framing::Sse => Poll::Ready(Some(Ok(ClientFrame::Done.encode(&this.framing)))),
                    Framing::Raw { .. } => Poll::Ready(None),
                }
            }
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.state == RelayState::Streaming {
            tracing::info!(
                request_id = %self.request_id,
                provider = %self.provider,
                frames_sent = self.frames_sent,
                "Client disconnected; releasing upstream connection"
            );
        }
    }
}

impl IntoResponse for Relay {
    fn into_response(self) -> Response {
        let content_type = HeaderValue::from_str(self.framing.content_type())
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_RAW_CONTENT_TYPE));
        let is_sse = self.framing == Framing::Sse;

        let mut response = Response::new(Body::from_stream(self));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if is_sse {
            // Stops nginx-style reverse proxies from buffering the stream.
            headers.insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
        }
        response
    }
}
