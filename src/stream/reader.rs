//! Stack-consuming reads.

use crate::backend::{CacheBackend, CacheOutcome};
use crate::error::Result;
use crate::session::Session;
use std::sync::Arc;

/// Result of probing a single token during a read.
enum ReadStep {
    Hit(Vec<u8>),
    SizeGated,
    Miss,
}

/// Reads the cache-backed stack a [`Session`] points at.
///
/// A `Reader` holds no session state itself — the caller supplies the
/// `Session` to operate on (typically locked for the duration of one pass)
/// so that a single session can be shared between a `Reader` and a
/// [`super::Writer`] without either owning it outright.
pub struct Reader {
    backend: Arc<dyn CacheBackend>,
}

impl Reader {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Probe the current token. `max_len`, if set, gates acceptance of a
    /// non-empty hit: a payload larger than `max_len` is reported as
    /// `SizeGated` without advancing the session, so the caller can retry
    /// with a larger destination once ready.
    ///
    /// Checking size and the miss/hit distinction *before* advancing (rather
    /// than advancing first and rewinding after, as the reference stack
    /// walk does) means a session position is only ever changed when this
    /// call is accepting the current token — there is nothing to undo on
    /// the miss path.
    async fn read_one(&self, session: &mut Session, max_len: Option<usize>) -> Result<ReadStep> {
        let (_, token) = session.current();
        match self.backend.get(&token).await? {
            CacheOutcome::Miss => Ok(ReadStep::Miss),
            CacheOutcome::Hit(bytes) if bytes.is_empty() => {
                // A HIT with no payload is a non-event: keep walking forward
                // without treating this as the stack top.
                session.advance();
                Ok(ReadStep::Hit(bytes))
            }
            CacheOutcome::Hit(bytes) => {
                if let Some(limit) = max_len {
                    if bytes.len() > limit {
                        return Ok(ReadStep::SizeGated);
                    }
                }
                session.advance();
                Ok(ReadStep::Hit(bytes))
            }
        }
    }

    /// Drain every available HIT from the current stack top, concatenated
    /// in order, stopping at the first MISS. The session is left pointed at
    /// that MISS token (not advanced past it) so a later call re-probes it.
    pub async fn read(&self, session: &mut Session) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.read_one(session, None).await? {
                ReadStep::Miss => break,
                ReadStep::Hit(bytes) => out.extend(bytes),
                ReadStep::SizeGated => unreachable!("read() never size-gates"),
            }
        }
        Ok(out)
    }

    /// Read a single token's payload, but only if it fits within `max_len`.
    /// Returns an empty vector (and an unchanged session position) on MISS
    /// or on a payload too large for the caller's buffer.
    pub async fn read_limited(&self, session: &mut Session, max_len: usize) -> Result<Vec<u8>> {
        match self.read_one(session, Some(max_len)).await? {
            ReadStep::Miss | ReadStep::SizeGated => Ok(Vec::new()),
            ReadStep::Hit(bytes) => Ok(bytes),
        }
    }
}
