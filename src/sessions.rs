//! Per-client sessions.
//!
//! A session pairs a compressing pipe with the task uploading it. Sessions
//! are created by the first chunk of a client and live until `shutdown`,
//! which removes every session exactly once and waits for its upload.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use blob_store::{BlobSink, SinkError, SinkFactory};
use dashmap::{mapref::entry::Entry, DashMap};
use data_model::{ClientId, SessionState, UploadOutcome};
use futures::{stream, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    metrics::relay_stats,
    pipe::{pipe, PipeError, PipeWriter},
    upload::spawn_upload,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainFailure {
    pub client_id: ClientId,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot start session for client {client_id}: {source}")]
    Configuration {
        client_id: ClientId,
        #[source]
        source: SinkError,
    },

    #[error("write failed for client {client_id}: {source}")]
    Pipe {
        client_id: ClientId,
        #[source]
        source: PipeError,
    },

    #[error("shutting down, not accepting new sessions")]
    ShuttingDown,

    #[error("{} of {total} sessions failed to drain", .failures.len())]
    PartialDrain {
        total: usize,
        failures: Vec<DrainFailure>,
    },
}

/// Sessions drained by a successful `shutdown`.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub drained: Vec<(ClientId, UploadOutcome)>,
}

struct Session {
    client_id: ClientId,
    writer: PipeWriter,
    sink: Arc<dyn BlobSink>,
    state: Arc<watch::Sender<SessionState>>,
    upload: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn start(
        client_id: ClientId,
        factory: &dyn SinkFactory,
        pipe_capacity: usize,
        metrics: Arc<relay_stats::Metrics>,
    ) -> Result<Arc<Session>, SinkError> {
        let sink = factory.create(client_id)?;
        let (writer, reader) = pipe(pipe_capacity);
        let state = Arc::new(watch::channel(SessionState::Pending).0);
        let upload = spawn_upload(client_id, sink.clone(), reader, state.clone(), metrics);
        Ok(Arc::new(Session {
            client_id,
            writer,
            sink,
            state,
            upload: Mutex::new(Some(upload)),
        }))
    }

    fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Closes the pipe, waits for the upload and returns its outcome.
    async fn drain(&self) -> Result<UploadOutcome, String> {
        self.state.send_if_modified(|state| {
            if state.accepts_writes() {
                *state = SessionState::Draining;
                true
            } else {
                false
            }
        });

        if let Err(err) = self.writer.close().await {
            warn!(client_id = %self.client_id, "error closing pipe: {}", err);
        }
        if let Err(err) = self.sink.await_completion().await {
            debug!(client_id = %self.client_id, "sink reported: {}", err);
        }

        let upload = self.upload.lock().await.take();
        if let Some(upload) = upload {
            if let Err(err) = upload.await {
                let reason = format!("upload task failed: {}", err);
                self.state
                    .send_replace(SessionState::Done(UploadOutcome::Failed {
                        reason: reason.clone(),
                    }));
                return Err(reason);
            }
        }

        match self.state() {
            SessionState::Done(UploadOutcome::Failed { reason }) => Err(reason),
            SessionState::Done(outcome) => Ok(outcome),
            other => Err(format!("upload ended in state {}", other)),
        }
    }
}

pub struct SessionRegistry {
    sessions: DashMap<ClientId, Arc<Session>>,
    factory: Arc<dyn SinkFactory>,
    pipe_capacity: usize,
    shutdown_concurrency: usize,
    shutting_down: AtomicBool,
    metrics: Arc<relay_stats::Metrics>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn SinkFactory>,
        pipe_capacity: usize,
        shutdown_concurrency: usize,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            factory,
            pipe_capacity: pipe_capacity.max(1),
            shutdown_concurrency: shutdown_concurrency.max(1),
            shutting_down: AtomicBool::new(false),
            metrics: Arc::new(relay_stats::Metrics::new()),
        }
    }

    /// Writes `data` as one record of `client_id`'s stream, opening the
    /// session on first use. Returns the number of bytes accepted.
    pub async fn dispatch(&self, client_id: ClientId, data: &[u8]) -> Result<usize, RegistryError> {
        let session = self.resolve(client_id).inspect_err(|_| {
            self.metrics.dispatch_errors.add(1, &[]);
        })?;

        match session.writer.write(data).await {
            Ok(written) => {
                self.metrics.chunks_dispatched.add(1, &[]);
                self.metrics.bytes_dispatched.add(written as u64, &[]);
                Ok(written)
            }
            Err(source) => {
                self.metrics.dispatch_errors.add(1, &[]);
                warn!(%client_id, "dropping chunk: {}", source);
                Err(RegistryError::Pipe { client_id, source })
            }
        }
    }

    fn resolve(&self, client_id: ClientId) -> Result<Arc<Session>, RegistryError> {
        let existing = self
            .sessions
            .get(&client_id)
            .map(|entry| entry.value().clone());
        if let Some(session) = existing {
            return Ok(session);
        }

        // The entry holds the shard lock, so concurrent first writes of one
        // client start a single session.
        match self.sessions.entry(client_id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                if self.shutting_down.load(Ordering::SeqCst) {
                    return Err(RegistryError::ShuttingDown);
                }
                info!(%client_id, "creating upload session");
                let session = Session::start(
                    client_id,
                    self.factory.as_ref(),
                    self.pipe_capacity,
                    self.metrics.clone(),
                )
                .map_err(|source| {
                    error!(%client_id, "cannot create upload session: {}", source);
                    RegistryError::Configuration { client_id, source }
                })?;
                entry.insert(session.clone());
                self.metrics.sessions_created.add(1, &[]);
                Ok(session)
            }
        }
    }

    /// Stops accepting new sessions and drains every existing one.
    ///
    /// All sessions are attempted even when some fail. A second call finds
    /// nothing left and returns an empty report.
    pub async fn shutdown(&self) -> Result<ShutdownReport, RegistryError> {
        self.shutting_down.store(true, Ordering::SeqCst);

        let client_ids: Vec<ClientId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let sessions: Vec<Arc<Session>> = client_ids
            .into_iter()
            .filter_map(|client_id| self.sessions.remove(&client_id).map(|(_, s)| s))
            .collect();
        let total = sessions.len();
        info!(sessions = total, "closing data pipes");

        let results: Vec<(ClientId, Result<UploadOutcome, String>)> = stream::iter(sessions)
            .map(|session| async move { (session.client_id, session.drain().await) })
            .buffer_unordered(self.shutdown_concurrency)
            .collect()
            .await;

        let mut report = ShutdownReport::default();
        let mut failures = Vec::new();
        for (client_id, result) in results {
            match result {
                Ok(outcome) => report.drained.push((client_id, outcome)),
                Err(reason) => {
                    error!(%client_id, "session failed to drain: {}", reason);
                    failures.push(DrainFailure { client_id, reason });
                }
            }
        }
        report.drained.sort_by_key(|(client_id, _)| *client_id);
        failures.sort_by_key(|failure| failure.client_id);

        if failures.is_empty() {
            info!(sessions = total, "all sessions drained");
            Ok(report)
        } else {
            Err(RegistryError::PartialDrain { total, failures })
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn session_state(&self, client_id: ClientId) -> Option<SessionState> {
        self.sessions.get(&client_id).map(|entry| entry.state())
    }

    /// Waits until the session of `client_id` satisfies `f`. Returns `None`
    /// if there is no such session.
    pub async fn wait_for_state(
        &self,
        client_id: ClientId,
        f: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        let mut rx = self
            .sessions
            .get(&client_id)
            .map(|entry| entry.state.subscribe())?;
        let state = rx.wait_for(f).await.ok().map(|state| (*state).clone());
        state
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Client id and state of every live session, ordered by client id.
    pub fn snapshot(&self) -> Vec<(ClientId, SessionState)> {
        let mut sessions: Vec<(ClientId, SessionState)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().state()))
            .collect();
        sessions.sort_by_key(|(client_id, _)| *client_id);
        sessions
    }
}
