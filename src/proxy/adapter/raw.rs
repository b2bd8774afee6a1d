//! Adapter that forwards upstream bytes without parsing them.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::CONTENT_TYPE;

use super::{
    Framing, OpenedStream, ProviderAdapter, UpstreamClient, UpstreamUnit,
    DEFAULT_RAW_CONTENT_TYPE,
};
use crate::config::AdapterKind;
use crate::credentials::ProviderCredentials;
use crate::error::{Error, Result};
use crate::proxy::types::UpstreamPayload;

/// Largest block forwarded in one frame.
pub const RAW_BLOCK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct RawByteAdapter {
    upstream: UpstreamClient,
}

impl RawByteAdapter {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self { upstream }
    }
}

/// Cut one transport chunk into blocks of at most [`RAW_BLOCK_SIZE`] bytes.
/// Blocks share the chunk's buffer.
fn split_blocks(chunk: Result<Bytes>) -> Vec<Result<UpstreamUnit>> {
    let bytes = match chunk {
        Ok(bytes) => bytes,
        Err(e) => return vec![Err(e)],
    };

    let mut units = Vec::with_capacity(bytes.len().div_ceil(RAW_BLOCK_SIZE));
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + RAW_BLOCK_SIZE).min(bytes.len());
        units.push(Ok(UpstreamUnit::Bytes(bytes.slice(offset..end))));
        offset = end;
    }
    units
}

#[async_trait]
impl ProviderAdapter for RawByteAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Raw
    }

    async fn open(
        &self,
        payload: &UpstreamPayload,
        credentials: &ProviderCredentials,
    ) -> Result<OpenedStream> {
        let response = self.upstream.send(payload, credentials, None).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_RAW_CONTENT_TYPE)
            .to_string();

        let units = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .flat_map(|chunk| stream::iter(split_blocks(chunk)))
            .boxed();

        Ok(OpenedStream {
            framing: Framing::Raw { content_type },
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_lens(units: Vec<Result<UpstreamUnit>>) -> Vec<usize> {
        units
            .into_iter()
            .map(|u| match u.unwrap() {
                UpstreamUnit::Bytes(b) => b.len(),
                other => panic!("unexpected unit {:?}", other),
            })
            .collect()
    }

    #[test]
    fn small_chunk_is_one_block() {
        let units = split_blocks(Ok(Bytes::from_static(b"hello")));
        assert_eq!(units.len(), 1);
        assert_eq!(
            units[0].as_ref().unwrap(),
            &UpstreamUnit::Bytes(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn large_chunk_is_split_in_order() {
        let data: Vec<u8> = (0..(RAW_BLOCK_SIZE * 2 + 10)).map(|i| i as u8).collect();
        assert_eq!(
            block_lens(split_blocks(Ok(Bytes::from(data.clone())))),
            vec![RAW_BLOCK_SIZE, RAW_BLOCK_SIZE, 10]
        );

        let units = split_blocks(Ok(Bytes::from(data.clone())));
        let rejoined: Vec<u8> = units
            .into_iter()
            .flat_map(|u| match u.unwrap() {
                UpstreamUnit::Bytes(b) => b.to_vec(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        assert!(split_blocks(Ok(Bytes::new())).is_empty());
    }

    #[test]
    fn error_passes_through() {
        let units = split_blocks(Err(Error::Network("reset".to_string())));
        assert!(matches!(units.as_slice(), [Err(Error::Network(_))]));
    }
}
