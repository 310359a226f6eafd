//! Storage sinks for relayed client streams.
//!
//! A [`BlobSink`] accepts a stream of bytes and persists it under a
//! destination key that is computed once per client and calendar day. The
//! relay only depends on the [`BlobSink`] and [`SinkFactory`] traits; the
//! concrete backend (S3, Azure Blob Storage or the local filesystem) is
//! chosen by [`SinkConfig::backend`].
//!
//! Every backend streams through `object_store`'s multipart writer, so a
//! payload is never held in memory as a whole. The part size and the number
//! of parts uploaded in parallel are sink configuration.
//!
//! ```rust,no_run
//! use blob_store::{BackendSinkFactory, SinkConfig, SinkFactory};
//! use data_model::ClientId;
//!
//! # async fn example(stream: blob_store::ByteStream) -> Result<(), blob_store::SinkError> {
//! let factory = BackendSinkFactory::new(SinkConfig::default())?;
//! let sink = factory.create(ClientId::new(7))?;
//! let key = sink.destination_key().to_string();
//! sink.upload(stream, &key).await?;
//! sink.await_completion().await?;
//! # Ok(())
//! # }
//! ```

mod backends;
mod config;
mod error;
mod factory;
pub mod keys;
mod sink;
mod tracker;

pub use backends::azure::{AzureContainer, ContainerApi, ContainerCreateError};
pub use config::{
    default_local_root,
    AzureConfig,
    Backend,
    EnvLookup,
    LocalConfig,
    S3Config,
    SinkConfig,
    AWS_ACCESS_KEY,
    AWS_ACCESS_SECRET,
    AWS_BUCKET,
    AWS_ENDPOINT_URL,
    AWS_REGION,
    AZURE_STORAGE_ACCESS_KEY,
    AZURE_STORAGE_ACCOUNT,
    DEFAULT_CONCURRENCY,
    DEFAULT_PART_SIZE,
    S3_MIN_PART_SIZE,
};
pub use error::{SinkError, SinkResult};
pub use factory::{BackendSinkFactory, SinkFactory};
pub use sink::{BlobSink, ByteStream, ObjectStoreSink, Preflight, PutResult};
pub use tracker::UploadTracker;
