use std::sync::Arc;

use blob_store::BlobSink;
use data_model::{ClientId, SessionState, UploadOutcome};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, info_span, Instrument};

use crate::{metrics::relay_stats, pipe::PipeReader};

/// Spawns the task that streams one client's pipe into its sink.
///
/// The task never retries. Whatever the sink returns ends up as the
/// session's `Done` state.
pub fn spawn_upload(
    client_id: ClientId,
    sink: Arc<dyn BlobSink>,
    reader: PipeReader,
    state: Arc<watch::Sender<SessionState>>,
    metrics: Arc<relay_stats::Metrics>,
) -> JoinHandle<()> {
    let span = info_span!("upload", client_id = %client_id);
    tokio::spawn(
        async move {
            state.send_if_modified(|current| match current {
                SessionState::Pending => {
                    *current = SessionState::Active;
                    true
                }
                _ => false,
            });

            let key = sink.destination_key().to_string();
            info!(key, "streaming client content");
            let outcome = match sink.upload(reader.into_byte_stream(), &key).await {
                Ok(put) => {
                    metrics.uploads_completed.add(1, &[]);
                    metrics.uploaded_bytes.add(put.size_bytes, &[]);
                    info!(key, bytes = put.size_bytes, url = %put.url, "upload complete");
                    UploadOutcome::Succeeded {
                        url: put.url,
                        size_bytes: put.size_bytes,
                        sha256_hash: put.sha256_hash,
                    }
                }
                Err(err) => {
                    metrics.uploads_failed.add(1, &[]);
                    error!(key, "error when uploading: {}", err);
                    UploadOutcome::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            state.send_replace(SessionState::Done(outcome));
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blob_store::SinkFactory;

    use super::*;
    use crate::{
        pipe::pipe,
        testing::{FailingSink, TestSinkFactory},
    };

    #[tokio::test]
    async fn test_upload_marks_session_done() {
        let factory = TestSinkFactory::new();
        let client_id = ClientId::new(3);
        let (writer, reader) = pipe(4);
        let (state, mut rx) = watch::channel(SessionState::Pending);
        let state = Arc::new(state);

        let handle = spawn_upload(
            client_id,
            factory.create(client_id).unwrap(),
            reader,
            state.clone(),
            Arc::new(relay_stats::Metrics::new()),
        );
        rx.wait_for(|s| *s != SessionState::Pending).await.unwrap();

        writer.write(b"hello").await.unwrap();
        writer.close().await.unwrap();
        handle.await.unwrap();

        let outcome = state.borrow().outcome().cloned().unwrap();
        assert!(outcome.is_success());
        assert_eq!(factory.content(3).await, b"hello\n");
    }

    #[tokio::test]
    async fn test_sink_failure_is_recorded_not_raised() {
        let (writer, reader) = pipe(4);
        let state = Arc::new(watch::channel(SessionState::Pending).0);

        let handle = spawn_upload(
            ClientId::new(4),
            Arc::new(FailingSink::new("k")),
            reader,
            state.clone(),
            Arc::new(relay_stats::Metrics::new()),
        );
        handle.await.unwrap();

        assert!(matches!(
            &*state.borrow(),
            SessionState::Done(UploadOutcome::Failed { reason }) if reason.contains("rejected")
        ));
        assert!(writer.write(b"late").await.is_err());
    }
}
