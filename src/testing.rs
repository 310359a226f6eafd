use std::{
    collections::HashSet,
    io::Read,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::Router;
use blob_store::{
    BlobSink,
    ByteStream,
    ObjectStoreSink,
    PutResult,
    SinkError,
    SinkFactory,
    SinkResult,
    UploadTracker,
};
use data_model::ClientId;
use flate2::read::GzDecoder;
use object_store::{memory::InMemory, path::Path, ObjectStore};

use crate::{
    middleware::InstanceRequestSpan,
    routes::{create_routes, RouteState},
    sessions::SessionRegistry,
};

/// Sink that rejects every upload without reading the stream.
pub struct FailingSink {
    key: String,
    tracker: UploadTracker,
}

impl FailingSink {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            tracker: UploadTracker::new(),
        }
    }
}

#[async_trait]
impl BlobSink for FailingSink {
    fn destination_key(&self) -> &str {
        &self.key
    }

    async fn upload(&self, data: ByteStream, _key: &str) -> SinkResult<PutResult> {
        self.tracker.begin();
        drop(data);
        let result = Err(SinkError::UploadFailed(
            "upload rejected by backend".to_string(),
        ));
        self.tracker.finish(&result);
        result
    }

    async fn await_completion(&self) -> SinkResult<()> {
        self.tracker.wait().await
    }
}

/// Factory handing out sinks over one shared in-memory store.
pub struct TestSinkFactory {
    store: Arc<InMemory>,
    created: AtomicUsize,
    failing_uploads: HashSet<ClientId>,
    misconfigured: HashSet<ClientId>,
    creation_delay: Option<Duration>,
}

impl TestSinkFactory {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            created: AtomicUsize::new(0),
            failing_uploads: HashSet::new(),
            misconfigured: HashSet::new(),
            creation_delay: None,
        }
    }

    pub fn with_failing_upload(mut self, client_id: i64) -> Self {
        self.failing_uploads.insert(ClientId::new(client_id));
        self
    }

    pub fn with_misconfigured(mut self, client_id: i64) -> Self {
        self.misconfigured.insert(ClientId::new(client_id));
        self
    }

    /// Makes every `create` block for `delay`, like a backend client that
    /// resolves credentials synchronously.
    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = Some(delay);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn key_for(client_id: ClientId) -> String {
        format!("test/{}", client_id)
    }

    /// Stored object for `client_id`, gunzipped.
    pub async fn content(&self, client_id: i64) -> Vec<u8> {
        let key = Self::key_for(ClientId::new(client_id));
        let compressed = self
            .store
            .get(&Path::from(key))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let mut out = Vec::new();
        GzDecoder::new(&compressed[..]).read_to_end(&mut out).unwrap();
        out
    }

    pub async fn exists(&self, client_id: i64) -> bool {
        let key = Self::key_for(ClientId::new(client_id));
        self.store.head(&Path::from(key)).await.is_ok()
    }
}

impl SinkFactory for TestSinkFactory {
    fn create(&self, client_id: ClientId) -> SinkResult<Arc<dyn BlobSink>> {
        if self.misconfigured.contains(&client_id) {
            return Err(SinkError::Configuration(
                "cannot create test sink, set TEST_BUCKET".to_string(),
            ));
        }
        if let Some(delay) = self.creation_delay {
            std::thread::sleep(delay);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let key = Self::key_for(client_id);
        if self.failing_uploads.contains(&client_id) {
            return Ok(Arc::new(FailingSink::new(&key)));
        }
        Ok(Arc::new(ObjectStoreSink::new(
            self.store.clone(),
            "memory://",
            key,
            64,
            2,
        )))
    }
}

pub fn test_router(registry: Arc<SessionRegistry>, max_body_bytes: usize) -> Router {
    create_routes(
        RouteState { registry },
        InstanceRequestSpan::new("test", "test-instance"),
        max_body_bytes,
    )
}
