//! Local filesystem backend, for development and tests.

use std::sync::Arc;

use object_store::{local::LocalFileSystem, ObjectStore};

use crate::{LocalConfig, SinkError, SinkResult};

pub(crate) fn build_object_store(config: &LocalConfig) -> SinkResult<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(&config.root).map_err(|e| {
        SinkError::Configuration(format!("cannot create local root {}: {}", config.root, e))
    })?;
    let store = LocalFileSystem::new_with_prefix(&config.root)
        .map_err(|e| SinkError::Configuration(format!("invalid local root {}: {}", config.root, e)))?;
    Ok(Arc::new(store))
}

pub(crate) fn base_url(config: &LocalConfig) -> String {
    format!("file://{}", config.root)
}
