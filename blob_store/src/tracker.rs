use tokio::sync::watch;

use crate::{PutResult, SinkError, SinkResult};

#[derive(Debug, Clone)]
enum UploadStatus {
    Idle,
    Running,
    Finished(Result<(), String>),
}

/// Tracks the most recent upload of a sink so callers can wait for it.
pub struct UploadTracker {
    status: watch::Sender<UploadStatus>,
}

impl Default for UploadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTracker {
    pub fn new() -> Self {
        let (status, _) = watch::channel(UploadStatus::Idle);
        Self { status }
    }

    pub fn begin(&self) {
        self.status.send_replace(UploadStatus::Running);
    }

    pub fn finish(&self, result: &SinkResult<PutResult>) {
        let status = match result {
            Ok(_) => Ok(()),
            Err(err) => Err(err.to_string()),
        };
        self.status.send_replace(UploadStatus::Finished(status));
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.borrow(), UploadStatus::Running)
    }

    /// Waits until no upload is running and returns the status of the last
    /// one. Returns `Ok(())` if nothing was ever uploaded.
    pub async fn wait(&self) -> SinkResult<()> {
        let mut rx = self.status.subscribe();
        let status = rx
            .wait_for(|status| !matches!(status, UploadStatus::Running))
            .await
            .map(|status| (*status).clone())
            .map_err(|e| SinkError::UploadFailed(e.to_string()))?;
        match status {
            UploadStatus::Idle | UploadStatus::Finished(Ok(())) => Ok(()),
            UploadStatus::Finished(Err(reason)) => Err(SinkError::UploadFailed(reason)),
            UploadStatus::Running => unreachable!("wait_for only returns settled states"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    fn put_result() -> PutResult {
        PutResult {
            url: "file:///tmp/x".to_string(),
            size_bytes: 1,
            sha256_hash: "00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_wait_without_upload_returns_immediately() {
        let tracker = UploadTracker::new();
        assert!(tracker.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_finished() {
        let tracker = Arc::new(UploadTracker::new());
        tracker.begin();
        assert!(tracker.is_running());

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tracker.finish(&Ok(put_result()));
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_reports_failure() {
        let tracker = UploadTracker::new();
        tracker.begin();
        tracker.finish(&Err(SinkError::Transport(anyhow::anyhow!("connection reset"))));
        let err = tracker.wait().await.unwrap_err();
        assert!(matches!(err, SinkError::UploadFailed(ref r) if r.contains("connection reset")));
    }
}
