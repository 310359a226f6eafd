//! S3-compatible backend.

use std::sync::Arc;

use object_store::{aws::AmazonS3Builder, ObjectStore};
use tracing::debug;

use crate::{config::ResolvedS3, SinkError, SinkResult};

pub(crate) fn build_object_store(settings: &ResolvedS3) -> SinkResult<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&settings.bucket)
        .with_region(&settings.region)
        .with_access_key_id(&settings.access_key_id)
        .with_secret_access_key(&settings.secret_access_key);

    // For supporting localstack/minio
    if let Some(endpoint) = &settings.endpoint {
        builder = builder.with_endpoint(endpoint);
        if endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }
    }

    let store = builder
        .build()
        .map_err(|e| SinkError::Configuration(format!("invalid s3 settings: {}", e)))?;
    debug!(bucket = %settings.bucket, region = %settings.region, "created s3 client");
    Ok(Arc::new(store))
}

pub(crate) fn base_url(settings: &ResolvedS3) -> String {
    format!("s3://{}", settings.bucket)
}
