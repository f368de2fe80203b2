//! Storage port over the authenticated HTTPS channel

use std::sync::Arc;

use async_trait::async_trait;
use cloudlink_domain::constants::{HEADER_CONTENT_RANGE, HEADER_RANGE};
use cloudlink_domain::{CloudLinkError, Result, StorageObject};
use serde::Deserialize;
use tracing::debug;

use super::ports::StorageTransport;
use crate::channel::{ChannelRequest, TransportChannel};

#[derive(Deserialize)]
struct Allocation {
    uri: String,
}

/// Allocation via `POST storage_path`, chunk upload via `PUT` with
/// `Content-Range`, chunk download via ranged `GET`
pub struct ChannelStorageTransport {
    channel: Arc<TransportChannel>,
    storage_path: String,
}

impl ChannelStorageTransport {
    pub fn new(channel: Arc<TransportChannel>, storage_path: impl Into<String>) -> Self {
        Self { channel, storage_path: storage_path.into() }
    }
}

#[async_trait]
impl StorageTransport for ChannelStorageTransport {
    async fn allocate(&self, object: &StorageObject) -> Result<String> {
        let response = self.channel.post_json(&self.storage_path, object).await?;
        let allocation: Allocation = response.json()?;
        if allocation.uri.trim().is_empty() {
            return Err(CloudLinkError::Protocol("storage allocation returned an empty uri".into()));
        }
        debug!(name = %object.name, uri = %allocation.uri, "storage object allocated");
        Ok(allocation.uri)
    }

    async fn put_chunk(
        &self,
        uri: &str,
        offset: u64,
        chunk: &[u8],
        total: Option<u64>,
    ) -> Result<()> {
        let last = (offset + chunk.len() as u64).saturating_sub(1);
        let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
        let request = ChannelRequest::put(uri)
            .with_body(chunk.to_vec(), "application/octet-stream")
            .with_header(HEADER_CONTENT_RANGE, format!("bytes {offset}-{last}/{total}"));
        self.channel.send(request).await?;
        Ok(())
    }

    async fn get_chunk(&self, uri: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let last = offset + len as u64 - 1;
        let request =
            ChannelRequest::get(uri).with_header(HEADER_RANGE, format!("bytes={offset}-{last}"));
        let mut body = self.channel.send(request).await?.body;
        // A server that ignores Range sends the whole object.
        if body.len() > len {
            body.truncate(len);
        }
        Ok(body)
    }
}
