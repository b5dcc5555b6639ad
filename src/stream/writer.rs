//! Stack-appending writes with collision recovery.

use crate::backend::{CacheBackend, SetOutcome};
use crate::error::Result;
use crate::session::Session;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// Writes bytes onto the stack a [`Session`] points at, chunked to fit the
/// target's URL length limits.
///
/// Like [`super::Reader`], a `Writer` does not own its `Session`; the caller
/// locks and supplies it so readers and writers on the same channel can
/// interleave under one consistent position.
pub struct Writer {
    backend: Arc<dyn CacheBackend>,
    chunk_size: usize,
    collisions: UnboundedSender<Vec<u8>>,
}

impl Writer {
    /// `collisions` receives the peer's payload whenever a write collides
    /// with data already cached at the token this writer was about to use.
    /// Unbounded so a collision never blocks the writer on a slow consumer.
    pub fn new(backend: Arc<dyn CacheBackend>, chunk_size: usize, collisions: UnboundedSender<Vec<u8>>) -> Self {
        Self {
            backend,
            chunk_size,
            collisions,
        }
    }

    /// Write `data`, chunked to `chunk_size`. Every chunk is retried at
    /// successive tokens until it lands on an empty one; any peer data
    /// discovered along the way is forwarded to the collision channel
    /// rather than being dropped.
    pub async fn write(&self, session: &mut Session, data: &[u8]) -> Result<usize> {
        for chunk in data.chunks(self.chunk_size.max(1)) {
            loop {
                let (_, token) = session.current();
                match self.backend.set(&token, chunk).await? {
                    SetOutcome::Ok => {
                        session.advance();
                        break;
                    }
                    SetOutcome::AlreadyCached(peer_data) => {
                        trace!(token = %token, len = peer_data.len(), "write collided, retrying next token");
                        if !peer_data.is_empty() {
                            // Unbounded send; only fails if every receiver
                            // (the DuplexStream poll loop) has been dropped.
                            let _ = self.collisions.send(peer_data);
                        }
                        session.advance();
                    }
                }
            }
        }
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::StubCacheBackend;

    #[tokio::test]
    async fn write_chunks_data_across_successive_tokens() {
        let backend = Arc::new(StubCacheBackend::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let writer = Writer::new(backend.clone(), 2, tx);
        let mut session = Session::new(5, 0xFFFF);

        let written = writer.write(&mut session, b"ABCDE").await.expect("write ok");
        assert_eq!(written, 5);
        assert_eq!(backend.set_count(), 3); // "AB", "CD", "E"
        assert_eq!(session.step(), 3);
    }

    #[tokio::test]
    async fn collision_forwards_peer_data_and_retries() {
        let backend = Arc::new(StubCacheBackend::new());
        let mut pre_occupied = Session::new(6, 0xFFFF);
        let (_, token0) = pre_occupied.current();
        backend.set(&token0, b"peer-data").await.expect("seed collision");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let writer = Writer::new(backend.clone(), 16, tx);
        let mut session = Session::new(6, 0xFFFF);

        writer.write(&mut session, b"mine").await.expect("write ok");
        assert_eq!(session.step(), 2); // collided at 0, succeeded at 1

        let collided = rx.try_recv().expect("collision forwarded");
        assert_eq!(collided, b"peer-data");
    }
}
