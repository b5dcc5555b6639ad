//! Combines a [`Reader`] and [`Writer`] over one shared [`Session`], adding
//! a background poll loop and write-collision buffering.

use super::{Reader, Writer};
use crate::backend::CacheBackend;
use crate::error::Result;
use crate::session::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A bidirectional tunnel endpoint: owns the shared session position, the
/// read/write halves over it, and the background task that polls for
/// inbound data.
///
/// Acquisition is scoped the way the reference implementation's context
/// manager is: [`DuplexStream::spawn_polling`] starts the background worker
/// and [`DuplexStream::shutdown`] guarantees it has stopped before
/// returning. A synchronous `Drop` can't await that join, so the guarantee
/// is an explicit async method rather than implicit teardown — callers must
/// call `shutdown` (or let the process exit) rather than simply dropping
/// the value.
pub struct DuplexStream {
    session: Arc<Mutex<Session>>,
    reader: Arc<Reader>,
    writer: Arc<Writer>,
    collisions: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    poll_interval: Duration,
    /// Capacity hint for the read side's internal buffering. Unused for now:
    /// the poll loop forwards every batch to the sink as soon as it reads it
    /// rather than accumulating up to a cap. Kept on the struct so a bounded
    /// accumulation strategy can be added without another signature change.
    buffer_size: usize,
    stop_flag: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    poll_task: Option<JoinHandle<()>>,
}

impl DuplexStream {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        channel: u64,
        max_step: u64,
        chunk_size: usize,
        poll_interval: Duration,
        buffer_size: usize,
    ) -> Self {
        let session = Arc::new(Mutex::new(Session::new(channel, max_step)));
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session,
            reader: Arc::new(Reader::new(backend.clone())),
            writer: Arc::new(Writer::new(backend, chunk_size, tx)),
            collisions: Arc::new(Mutex::new(rx)),
            poll_interval,
            buffer_size,
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            poll_task: None,
        }
    }

    /// Write `data` onto the stack. Locks the session for the full write
    /// pass, same as the background poller locks it for a full read pass,
    /// so the two never interleave mid-token.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut session = self.session.lock().await;
        self.writer.write(&mut session, data).await
    }

    /// Start the background poll loop. `sink` receives every batch of
    /// inbound bytes (collision-buffered peer data, then freshly read
    /// stack data, in that order) as soon as either is available.
    pub fn spawn_polling<F>(&mut self, sink: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let session = self.session.clone();
        let reader = self.reader.clone();
        let collisions = self.collisions.clone();
        let stop_flag = self.stop_flag.clone();
        let stop_notify = self.stop_notify.clone();
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            while !stop_flag.load(Ordering::Acquire) {
                let mut buffered = Vec::new();
                {
                    let mut rx = collisions.lock().await;
                    while let Ok(chunk) = rx.try_recv() {
                        buffered.extend(chunk);
                    }
                }

                let read_result = {
                    let mut session = session.lock().await;
                    reader.read(&mut session).await
                };

                match read_result {
                    Ok(fresh) => buffered.extend(fresh),
                    Err(e) => warn!(error = %e, "poll loop read failed, backing off"),
                }

                if buffered.is_empty() {
                    tokio::select! {
                        () = stop_notify.notified() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                } else {
                    sink(buffered);
                }
            }
            debug!("poll loop exited");
        });

        self.poll_task = Some(handle);
    }

    /// Signal the background worker to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.stop_notify.notify_one();
        if let Some(handle) = self.poll_task.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::StubCacheBackend;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Duration as TokioDuration};

    #[tokio::test]
    async fn peer_b_reads_what_peer_a_wrote() {
        // Two independent DuplexStreams on the same channel and backend,
        // each starting its own session at step 0 — exactly the situation
        // of two separate processes that never talk to each other directly.
        // A single stream never sees its own write echoed back: its reader
        // and writer share one session, so the writer's advance already
        // moves the local read position past what it just wrote.
        let backend = Arc::new(StubCacheBackend::new());
        let mut peer_a = DuplexStream::new(backend.clone(), 100, 0xFFFF, 1024, TokioDuration::from_millis(20), 4096);
        let mut peer_b = DuplexStream::new(backend, 100, 0xFFFF, 1024, TokioDuration::from_millis(20), 4096);

        let received: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = received.clone();
        peer_b.spawn_polling(move |bytes| {
            received_clone.lock().expect("lock poisoned").extend(bytes);
        });
        peer_a.spawn_polling(|_bytes| {});

        peer_a.write(b"Hello, world!").await.expect("write ok");
        sleep(TokioDuration::from_millis(80)).await;

        assert_eq!(&received.lock().expect("lock poisoned")[..], b"Hello, world!");
        peer_a.shutdown().await;
        peer_b.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_background_worker() {
        let backend = Arc::new(StubCacheBackend::new());
        let mut stream = DuplexStream::new(backend, 200, 0xFFFF, 1024, TokioDuration::from_millis(10), 4096);
        stream.spawn_polling(|_bytes| {});
        sleep(TokioDuration::from_millis(40)).await;
        stream.shutdown().await;
    }
}
