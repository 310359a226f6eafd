use std::sync::Arc;

use chrono::NaiveDate;
use data_model::ClientId;
use object_store::ObjectStore;
use tracing::debug;

use crate::{
    backends::{azure, local, s3},
    keys,
    Backend,
    BlobSink,
    EnvLookup,
    ObjectStoreSink,
    SinkConfig,
    SinkError,
    SinkResult,
};

/// Builds the sink for a new client session.
///
/// Creation only validates settings and constructs clients; it performs no
/// network or filesystem I/O, so it is safe to call while holding the session
/// map's entry lock.
pub trait SinkFactory: Send + Sync {
    fn create(&self, client_id: ClientId) -> SinkResult<Arc<dyn BlobSink>>;
}

/// Factory selecting the backend from [`SinkConfig`].
pub struct BackendSinkFactory {
    config: SinkConfig,
    env: Arc<EnvLookup>,
    // Opened once so that `create` never touches the filesystem.
    local_store: Option<Arc<dyn ObjectStore>>,
}

impl BackendSinkFactory {
    pub fn new(config: SinkConfig) -> SinkResult<Self> {
        Self::with_env(config, Arc::new(|key: &str| std::env::var(key).ok()))
    }

    pub fn with_env(config: SinkConfig, env: Arc<EnvLookup>) -> SinkResult<Self> {
        config.validate()?;
        let local_store = match config.backend {
            Backend::Local => Some(local::build_object_store(&config.local)?),
            Backend::S3 | Backend::Azure => None,
        };
        Ok(Self {
            config,
            env,
            local_store,
        })
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    pub fn create_for_date(
        &self,
        client_id: ClientId,
        date: NaiveDate,
    ) -> SinkResult<Arc<dyn BlobSink>> {
        let part_size = self.config.part_size_bytes;
        let concurrency = self.config.concurrency;
        let sink = match self.config.backend {
            Backend::S3 => {
                let settings = self.config.s3.resolve(&*self.env)?;
                let store = s3::build_object_store(&settings)?;
                let key = keys::prefixed_key(&settings.prefix, date, client_id);
                ObjectStoreSink::new(store, s3::base_url(&settings), key, part_size, concurrency)
            }
            Backend::Azure => {
                let settings = self.config.azure.resolve(&*self.env)?;
                let container = keys::azure_container(date);
                let store = azure::build_object_store(&settings, &container)?;
                let key = keys::azure_blob_name(date, client_id);
                ObjectStoreSink::new(
                    store,
                    azure::base_url(&settings, &container),
                    key,
                    part_size,
                    concurrency,
                )
                .with_preflight(Arc::new(azure::container(&settings, &container)))
            }
            Backend::Local => {
                let store = self.local_store.clone().ok_or_else(|| {
                    SinkError::Configuration("local store was not initialized".to_string())
                })?;
                let key = keys::prefixed_key(&self.config.local.prefix, date, client_id);
                ObjectStoreSink::new(
                    store,
                    local::base_url(&self.config.local),
                    key,
                    part_size,
                    concurrency,
                )
            }
        };
        debug!(
            client_id = %client_id,
            backend = ?self.config.backend,
            key = sink.destination_key(),
            "created sink"
        );
        Ok(Arc::new(sink))
    }
}

impl SinkFactory for BackendSinkFactory {
    fn create(&self, client_id: ClientId) -> SinkResult<Arc<dyn BlobSink>> {
        self.create_for_date(client_id, keys::today())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use futures::{stream, StreamExt};

    use super::*;
    use crate::{
        LocalConfig,
        AWS_ACCESS_KEY,
        AWS_ACCESS_SECRET,
        AWS_BUCKET,
        AWS_REGION,
        AZURE_STORAGE_ACCESS_KEY,
        AZURE_STORAGE_ACCOUNT,
    };

    fn env(vars: &[(&str, &str)]) -> Arc<EnvLookup> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |key: &str| vars.get(key).cloned())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn test_s3_sink_key() {
        let config = SinkConfig {
            backend: Backend::S3,
            ..Default::default()
        };
        let factory = BackendSinkFactory::with_env(
            config,
            env(&[
                (AWS_BUCKET, "logs"),
                (AWS_REGION, "eu-central-1"),
                (AWS_ACCESS_KEY, "key"),
                (AWS_ACCESS_SECRET, "secret"),
            ]),
        )
        .unwrap();
        let sink = factory.create_for_date(ClientId::new(9), date()).unwrap();
        assert_eq!(sink.destination_key(), "chat/2024-05-01/9");
    }

    #[test]
    fn test_azure_sink_key() {
        let config = SinkConfig {
            backend: Backend::Azure,
            ..Default::default()
        };
        let factory = BackendSinkFactory::with_env(
            config,
            env(&[
                (AZURE_STORAGE_ACCOUNT, "acct"),
                (AZURE_STORAGE_ACCESS_KEY, "a2V5"),
            ]),
        )
        .unwrap();
        let sink = factory.create_for_date(ClientId::new(9), date()).unwrap();
        assert_eq!(sink.destination_key(), "content-logs-2024-05-01-9");
    }

    #[test]
    fn test_missing_credentials_fail_creation() {
        let config = SinkConfig {
            backend: Backend::S3,
            ..Default::default()
        };
        let factory = BackendSinkFactory::with_env(config, env(&[])).unwrap();
        let err = factory.create(ClientId::new(1)).err().unwrap();
        assert!(matches!(err, SinkError::Configuration(_)));
    }

    #[test]
    fn test_invalid_config_rejected_upfront() {
        let config = SinkConfig {
            backend: Backend::S3,
            part_size_bytes: 1,
            ..Default::default()
        };
        assert!(BackendSinkFactory::with_env(config, env(&[])).is_err());
    }

    #[tokio::test]
    async fn test_local_sink_writes_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = SinkConfig {
            backend: Backend::Local,
            part_size_bytes: 16,
            local: LocalConfig {
                root: temp_dir.path().to_str().unwrap().to_string(),
                prefix: "chat".to_string(),
            },
            ..Default::default()
        };
        let factory = BackendSinkFactory::with_env(config, env(&[])).unwrap();
        let sink = factory.create_for_date(ClientId::new(3), date()).unwrap();

        let data: Vec<anyhow::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"first chunk, ")),
            Ok(Bytes::from_static(b"second chunk")),
        ];
        let key = sink.destination_key().to_string();
        let result = sink.upload(stream::iter(data).boxed(), &key).await.unwrap();
        assert_eq!(result.size_bytes, 25);

        let written = std::fs::read(temp_dir.path().join("chat/2024-05-01/3")).unwrap();
        assert_eq!(written, b"first chunk, second chunk");
    }

    #[test]
    fn test_local_root_is_prepared_at_construction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/blobs");
        let config = SinkConfig {
            backend: Backend::Local,
            local: LocalConfig {
                root: root.to_str().unwrap().to_string(),
                prefix: "chat".to_string(),
            },
            ..Default::default()
        };
        let factory = BackendSinkFactory::with_env(config, env(&[])).unwrap();
        assert!(root.is_dir());

        // Creating sinks afterwards leaves the filesystem alone.
        std::fs::remove_dir_all(&root).unwrap();
        let sink = factory.create_for_date(ClientId::new(4), date()).unwrap();
        assert_eq!(sink.destination_key(), "chat/2024-05-01/4");
        assert!(!root.exists());
    }
}
