//! Compressing pipe between request handlers and an upload task.
//!
//! Each `write` gzip-compresses one record (the chunk followed by
//! [`RECORD_DELIMITER`]) and hands the compressed bytes to the reader through
//! a bounded queue. A full queue suspends the writer until the reader
//! catches up, which is how a slow backend throttles its own client. The
//! gzip trailer is only produced by `close`.

use std::{
    io::Write,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Poll},
};

use blob_store::ByteStream;
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub const RECORD_DELIMITER: &[u8] = b"\n";

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("write on closed pipe")]
    Closed,

    #[error("pipe reader has gone away")]
    ReaderGone,

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// Creates a pipe whose queue holds at most `capacity` compressed frames.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (frames, rx) = mpsc::channel(capacity.max(1));
    let writer = PipeWriter {
        state: Mutex::new(WriterState::Open {
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
            frames,
        }),
        closed: AtomicBool::new(false),
    };
    (writer, PipeReader { frames: rx })
}

enum WriterState {
    Open {
        encoder: GzEncoder<Vec<u8>>,
        frames: mpsc::Sender<Bytes>,
    },
    Closed,
}

impl WriterState {
    fn encode_record(&mut self, data: &[u8]) -> Result<Bytes, PipeError> {
        match self {
            WriterState::Open { encoder, .. } => {
                encoder.write_all(data)?;
                encoder.write_all(RECORD_DELIMITER)?;
                Ok(Bytes::from(std::mem::take(encoder.get_mut())))
            }
            WriterState::Closed => Err(PipeError::Closed),
        }
    }
}

/// Write end of a pipe. Shared by every request handler of one client.
pub struct PipeWriter {
    state: Mutex<WriterState>,
    closed: AtomicBool,
}

impl PipeWriter {
    /// Writes one record and returns the number of payload bytes accepted.
    ///
    /// Concurrent writers are serialized, so records never interleave.
    pub async fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        let mut state = self.state.lock().await;
        let frames = match &*state {
            WriterState::Open { frames, .. } => frames.clone(),
            WriterState::Closed => return Err(PipeError::Closed),
        };

        // Reserve queue space before touching the encoder: a write cancelled
        // while waiting must leave the gzip stream unchanged.
        let permit = match frames.reserve_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                *state = WriterState::Closed;
                self.closed.store(true, Ordering::SeqCst);
                return Err(PipeError::ReaderGone);
            }
        };

        let frame = state.encode_record(data)?;
        if !frame.is_empty() {
            permit.send(frame);
        }
        Ok(data.len())
    }

    /// Flushes the gzip trailer and ends the stream. Closing twice is a
    /// no-op.
    pub async fn close(&self) -> Result<(), PipeError> {
        let mut state = self.state.lock().await;
        let (encoder, frames) = match std::mem::replace(&mut *state, WriterState::Closed) {
            WriterState::Open { encoder, frames } => (encoder, frames),
            WriterState::Closed => return Ok(()),
        };
        self.closed.store(true, Ordering::SeqCst);

        let trailer = encoder.finish()?;
        if !trailer.is_empty() && frames.send(Bytes::from(trailer)).await.is_err() {
            return Err(PipeError::ReaderGone);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Read end of a pipe, yielding compressed frames in write order.
pub struct PipeReader {
    frames: mpsc::Receiver<Bytes>,
}

impl PipeReader {
    pub fn into_byte_stream(self) -> ByteStream {
        self.boxed()
    }
}

impl Stream for PipeReader {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}
