use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use object_store::{path::Path, ObjectStore, WriteMultipart};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::{SinkError, SinkResult, UploadTracker};

/// Stream of bytes handed to a sink.
pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Result of an upload.
#[derive(Debug, Clone)]
pub struct PutResult {
    /// The URL/path where the blob was stored.
    pub url: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// SHA256 hash of the data.
    pub sha256_hash: String,
}

/// Capability to durably persist one byte stream.
#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Key this sink was created for.
    fn destination_key(&self) -> &str;

    /// Streams `data` to `key` until the stream ends. Errors are returned,
    /// never retried.
    async fn upload(&self, data: ByteStream, key: &str) -> SinkResult<PutResult>;

    /// Waits until the most recent `upload` on this sink has returned and
    /// reports its status.
    async fn await_completion(&self) -> SinkResult<()>;
}

/// Backend-specific work that must succeed before the first part is written.
#[async_trait]
pub trait Preflight: Send + Sync {
    async fn prepare(&self) -> SinkResult<()>;
}

/// A [`BlobSink`] writing through an `object_store` multipart upload.
pub struct ObjectStoreSink {
    object_store: Arc<dyn ObjectStore>,
    base_url: String,
    key: String,
    part_size: usize,
    concurrency: usize,
    preflight: Option<Arc<dyn Preflight>>,
    tracker: UploadTracker,
}

impl ObjectStoreSink {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        base_url: impl Into<String>,
        key: impl Into<String>,
        part_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            object_store,
            base_url: base_url.into(),
            key: key.into(),
            part_size: part_size.max(1),
            concurrency: concurrency.max(1),
            preflight: None,
            tracker: UploadTracker::new(),
        }
    }

    pub fn with_preflight(mut self, preflight: Arc<dyn Preflight>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn url_for(&self, key: &str) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, key)
        } else {
            format!("{}/{}", self.base_url, key)
        }
    }

    async fn stream_to_store(&self, mut data: ByteStream, key: &str) -> SinkResult<PutResult> {
        if let Some(preflight) = &self.preflight {
            preflight.prepare().await?;
        }

        let path = Path::from(key);
        let multipart = self.object_store.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(multipart, self.part_size);

        let mut hasher = Sha256::new();
        let mut size_bytes = 0;
        while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    abort(writer, key).await;
                    return Err(SinkError::Transport(err));
                }
            };
            if let Err(err) = writer.wait_for_capacity(self.concurrency).await {
                abort(writer, key).await;
                return Err(err.into());
            }
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer.finish().await?;

        Ok(PutResult {
            url: self.url_for(key),
            size_bytes,
            sha256_hash: format!("{:x}", hasher.finalize()),
        })
    }
}

async fn abort(writer: WriteMultipart, key: &str) {
    if let Err(err) = writer.abort().await {
        error!(key, "failed to abort multipart upload: {:?}", err);
    }
}

#[async_trait]
impl BlobSink for ObjectStoreSink {
    fn destination_key(&self) -> &str {
        &self.key
    }

    async fn upload(&self, data: ByteStream, key: &str) -> SinkResult<PutResult> {
        self.tracker.begin();
        debug!(key, url = %self.url_for(key), "starting upload");
        let result = self.stream_to_store(data, key).await;
        match &result {
            Ok(put) => info!(
                key,
                size_bytes = put.size_bytes,
                "finished streaming to {}", put.url
            ),
            Err(err) => error!(key, "error when uploading: {}", err),
        }
        self.tracker.finish(&result);
        result
    }

    async fn await_completion(&self) -> SinkResult<()> {
        debug!(key = %self.key, "waiting for upload to end");
        self.tracker.wait().await
    }
}
