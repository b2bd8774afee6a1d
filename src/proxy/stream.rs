//! Incremental decoding of upstream event bodies.
//!
//! [`SseDecoder`] reassembles lines across TCP chunk boundaries and groups
//! them into events. It holds at most one partial line plus the data lines of
//! the event being built, never the whole response. Besides SSE it reads
//! newline-delimited JSON, where every non-blank line is one event.
//! [`decode_sse`] and [`decode_ndjson`] wrap a byte stream into a stream of
//! event payloads that ends at the upstream's `[DONE]` sentinel or at end of
//! body.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::{Error, Result};

/// Longest line accepted before the stream is considered broken.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Largest joined payload of a single multi-line SSE event.
pub const MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

/// How an upstream body is split into events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineFormat {
    /// `data:` lines grouped into blank-line separated events.
    #[default]
    Sse,
    /// One JSON document per line.
    Ndjson,
}

impl LineFormat {
    /// Pick the format from an upstream `Content-Type`.
    ///
    /// Line-delimited and plain JSON types read as NDJSON; anything else,
    /// including a missing header, reads as SSE.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Self::Sse;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/x-ndjson"
            | "application/ndjson"
            | "application/jsonl"
            | "application/x-jsonlines"
            | "application/json" => Self::Ndjson,
            _ => Self::Sse,
        }
    }
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Joined `data:` payload, or one NDJSON line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Line-buffered event parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    format: LineFormat,
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    data_bytes: usize,
    pending: VecDeque<SseEvent>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(format: LineFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Feed a chunk of bytes. Complete events become available via
    /// [`SseDecoder::next_event`].
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(line)?;
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            return Err(Error::Network(format!(
                "upstream sent a line longer than {} bytes",
                MAX_LINE_BYTES
            )));
        }
        Ok(())
    }

    /// Flush a trailing line and any half-built event at end of body.
    pub fn finish(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(line)?;
        }
        self.dispatch();
        Ok(())
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.pending.pop_front()
    }

    fn process_line(&mut self, line: Vec<u8>) -> Result<()> {
        if line.is_empty() {
            self.dispatch();
            return Ok(());
        }

        let line = String::from_utf8(line)
            .map_err(|e| Error::Network(format!("invalid UTF-8 in upstream event: {}", e)))?;

        match self.format {
            LineFormat::Sse => {
                // event:, id:, retry: and ":" comments carry nothing we forward.
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.strip_prefix(' ').unwrap_or(data);
                    self.data_bytes += data.len() + 1;
                    if self.data_bytes > MAX_EVENT_BYTES {
                        self.data_lines.clear();
                        self.data_bytes = 0;
                        return Err(Error::Network(format!(
                            "upstream sent an event larger than {} bytes",
                            MAX_EVENT_BYTES
                        )));
                    }
                    self.data_lines.push(data.to_string());
                }
            }
            LineFormat::Ndjson => {
                let trimmed = line.trim();
                let payload = trimmed
                    .strip_prefix("data:")
                    .map(str::trim_start)
                    .unwrap_or(trimmed);
                if payload == "[DONE]" {
                    self.pending.push_back(SseEvent::Done);
                } else if !payload.is_empty() {
                    self.pending.push_back(SseEvent::Data(payload.to_string()));
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self) {
        if self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        self.data_bytes = 0;

        if data.trim() == "[DONE]" {
            self.pending.push_back(SseEvent::Done);
        } else {
            self.pending.push_back(SseEvent::Data(data));
        }
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    exhausted: bool,
}

/// Decode an upstream byte stream into SSE `data:` payloads.
///
/// The stream ends cleanly at `[DONE]` or end of body, and ends after
/// yielding one error if the body fails or cannot be decoded.
pub fn decode_sse<S, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    decode_events(body, LineFormat::Sse)
}

/// Decode a newline-delimited JSON body, one payload per non-blank line.
pub fn decode_ndjson<S, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    decode_events(body, LineFormat::Ndjson)
}

pub fn decode_events<S, E>(body: S, format: LineFormat) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::with_format(format),
        exhausted: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            match state.decoder.next_event() {
                Some(SseEvent::Done) => return None,
                Some(SseEvent::Data(data)) => return Some((Ok(data), Some(state))),
                None if state.exhausted => return None,
                None => {}
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = state.decoder.push(&chunk) {
                        return Some((Err(e), None));
                    }
                }
                Some(Err(e)) => return Some((Err(e.into()), None)),
                None => {
                    if let Err(e) = state.decoder.finish() {
                        return Some((Err(e), None));
                    }
                    state.exhausted = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build SSE data from event lines, then split at the given byte positions
    /// to simulate TCP chunk boundaries.
    fn split_sse_at_positions(events: &[&str], split_positions: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in split_positions {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn drain(decoder: &mut SseDecoder) -> Vec<SseEvent> {
        std::iter::from_fn(|| decoder.next_event()).collect()
    }

    fn data(s: &str) -> SseEvent {
        SseEvent::Data(s.to_string())
    }

    #[test]
    fn test_single_chunk_full_stream() {
        let events = [
            r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" world"}}]}"#,
            "data: [DONE]",
        ];
        let chunks = split_sse_at_positions(&events, &[]);
        assert_eq!(chunks.len(), 1);

        let mut decoder = SseDecoder::new();
        decoder.push(&chunks[0]).unwrap();
        assert_eq!(
            drain(&mut decoder),
            vec![
                data(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#),
                data(r#"{"choices":[{"delta":{"content":" world"}}]}"#),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let events = [
            r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ];
        let chunks = split_sse_at_positions(&events, &[3, 20, 60, 95]);
        assert!(chunks.len() > 1);

        let mut decoder = SseDecoder::new();
        let mut seen = Vec::new();
        for chunk in &chunks {
            decoder.push(chunk).unwrap();
            seen.extend(drain(&mut decoder));
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], SseEvent::Done);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let raw = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte 'é'.
        let mut decoder = SseDecoder::new();
        decoder.push(&raw[..8]).unwrap();
        assert!(decoder.next_event().is_none());
        decoder.push(&raw[8..]).unwrap();
        assert_eq!(drain(&mut decoder), vec![data("héllo")]);
    }

    #[test]
    fn test_non_data_sse_fields_skipped() {
        let raw = b"event: message\nid: 123\nretry: 5000\n: OPENROUTER PROCESSING\n\ndata: {\"x\":1}\n\n";
        let mut decoder = SseDecoder::new();
        decoder.push(raw).unwrap();
        assert_eq!(drain(&mut decoder), vec![data("{\"x\":1}")]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let raw = b"data: {\"a\":1}\r\n\r\ndata: [DONE]\r\n\r\n";
        let mut decoder = SseDecoder::new();
        decoder.push(raw).unwrap();
        assert_eq!(drain(&mut decoder), vec![data("{\"a\":1}"), SseEvent::Done]);
    }

    #[test]
    fn test_data_without_space() {
        let raw = b"data:{\"a\":1}\n\ndata:[DONE]\n\n";
        let mut decoder = SseDecoder::new();
        decoder.push(raw).unwrap();
        assert_eq!(drain(&mut decoder), vec![data("{\"a\":1}"), SseEvent::Done]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let raw = b"data: line one\ndata: line two\n\n";
        let mut decoder = SseDecoder::new();
        decoder.push(raw).unwrap();
        assert_eq!(drain(&mut decoder), vec![data("line one\nline two")]);
    }

    #[test]
    fn test_done_without_trailing_newline() {
        let raw = b"data: {\"a\":1}\n\ndata: [DONE]";
        let mut decoder = SseDecoder::new();
        decoder.push(raw).unwrap();
        assert_eq!(drain(&mut decoder), vec![data("{\"a\":1}")]);

        decoder.finish().unwrap();
        assert_eq!(drain(&mut decoder), vec![SseEvent::Done]);
    }

    #[test]
    fn test_empty_stream() {
        let mut decoder = SseDecoder::new();
        decoder.finish().unwrap();
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: \xff\n\n").is_err());
    }

    #[test]
    fn test_line_cap() {
        let huge_chunk = vec![b'x'; MAX_LINE_BYTES + 1];
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&huge_chunk).is_err());

        // Buffer was dropped; later well-formed data still decodes.
        decoder.push(b"\ndata: ok\n\n").unwrap();
        assert_eq!(drain(&mut decoder), vec![data("ok")]);
    }

    #[test]
    fn test_event_cap_across_data_lines() {
        let line = format!("data: {}\n", "y".repeat(MAX_LINE_BYTES / 2));
        let mut decoder = SseDecoder::new();
        let mut failed = false;
        for _ in 0..(MAX_EVENT_BYTES / (MAX_LINE_BYTES / 2) + 1) {
            if decoder.push(line.as_bytes()).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);

        // The oversized event was discarded.
        decoder.push(b"\ndata: ok\n\n").unwrap();
        assert_eq!(drain(&mut decoder), vec![data("ok")]);
    }

    #[test]
    fn test_ndjson_lines_are_events() {
        let raw = b"{\"a\":1}\n\n  {\"b\":2}\r\n[DONE]\n";
        let mut decoder = SseDecoder::with_format(LineFormat::Ndjson);
        decoder.push(raw).unwrap();
        assert_eq!(
            drain(&mut decoder),
            vec![data("{\"a\":1}"), data("{\"b\":2}"), SseEvent::Done]
        );
    }

    #[test]
    fn test_ndjson_tail_without_newline() {
        let mut decoder = SseDecoder::with_format(LineFormat::Ndjson);
        decoder.push(b"{\"a\":1}\n{\"b\"").unwrap();
        assert_eq!(drain(&mut decoder), vec![data("{\"a\":1}")]);
        decoder.push(b":2}").unwrap();
        decoder.finish().unwrap();
        assert_eq!(drain(&mut decoder), vec![data("{\"b\":2}")]);
    }

    #[test]
    fn test_format_from_content_type() {
        assert_eq!(
            LineFormat::from_content_type(Some("application/x-ndjson")),
            LineFormat::Ndjson
        );
        assert_eq!(
            LineFormat::from_content_type(Some("Application/JSON; charset=utf-8")),
            LineFormat::Ndjson
        );
        assert_eq!(
            LineFormat::from_content_type(Some("text/event-stream")),
            LineFormat::Sse
        );
        assert_eq!(LineFormat::from_content_type(None), LineFormat::Sse);
    }

    fn body(chunks: Vec<Result<&'static str>>) -> impl Stream<Item = Result<Bytes>> + Send {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes()))),
        )
    }

    #[tokio::test]
    async fn decode_sse_stops_at_done() {
        let events: Vec<Result<String>> = decode_sse(body(vec![
            Ok("data: one\n\nda"),
            Ok("ta: two\n\ndata: [DONE]\n\n"),
            Ok("data: after-done\n\n"),
        ]))
        .collect()
        .await;

        let events: Vec<String> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn decode_sse_flushes_unterminated_event_at_end() {
        let events: Vec<Result<String>> =
            decode_sse(body(vec![Ok("data: one\n\ndata: tail")])).collect().await;
        let events: Vec<String> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events, vec!["one".to_string(), "tail".to_string()]);
    }

    #[tokio::test]
    async fn decode_sse_ends_after_transport_error() {
        let mut events = decode_sse(body(vec![
            Ok("data: one\n\n"),
            Err(Error::Network("connection reset".to_string())),
            Ok("data: never\n\n"),
        ]));

        assert_eq!(events.next().await.unwrap().unwrap(), "one");
        assert!(matches!(events.next().await, Some(Err(Error::Network(_)))));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn decode_ndjson_yields_each_line() {
        let events: Vec<Result<String>> = decode_ndjson(body(vec![
            Ok("{\"n\":1}\n{\"n\""),
            Ok(":2}\n"),
        ]))
        .collect()
        .await;
        let events: Vec<String> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events, vec!["{\"n\":1}".to_string(), "{\"n\":2}".to_string()]);
    }
}
