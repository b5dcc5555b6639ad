//! The cache key-value abstraction: treats a remote vulnerable cache as a
//! `token -> bytes` map with HIT/MISS semantics, behind a pluggable backend
//! trait so the HTTP specifics of one target never leak into the session or
//! stream layers.

mod extractor;
mod http;

pub use extractor::ReflectedUrlExtractor;
pub use http::{HttpCacheBackend, HttpCacheConfig};

use crate::error::Result;
use async_trait::async_trait;

/// Outcome of probing a token for a cached payload.
///
/// `Miss` is a normal protocol signal, not a failure: it is how the
/// [`crate::stream::Reader`] discovers the top of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit(Vec<u8>),
    Miss,
}

/// Outcome of attempting to write a payload at a token.
///
/// `AlreadyCached` is a normal protocol signal: another peer wrote at this
/// token first. It carries their payload so the caller can recover it
/// instead of losing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Ok,
    AlreadyCached(Vec<u8>),
}

/// A remote cache reachable as a `token -> bytes` map.
///
/// Implementations decide how a token becomes a request and how a cached
/// response's payload is recovered; everything above this trait (`Session`,
/// `Reader`, `Writer`) is backend-agnostic.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Probe `token`. Returns `Hit` with the decoded payload, or `Miss` if
    /// the cache has nothing for this token (including the case where the
    /// payload is cached but fails to decode).
    async fn get(&self, token: &str) -> Result<CacheOutcome>;

    /// Attempt to write `value` at `token`. Returns `Ok` if this call
    /// created the cache entry, or `AlreadyCached` carrying whatever was
    /// already there if a peer beat this call to it.
    async fn set(&self, token: &str, value: &[u8]) -> Result<SetOutcome>;
}

/// Recovers the payload reflected into a cached response body.
///
/// This is the one part of the system that is inherently specific to a
/// single vulnerable target: the exact HTML chrome surrounding the
/// reflected value. Implementations are expected to fail closed (return
/// `None`) on anything that doesn't look like their expected shape rather
/// than panicking or erroring the whole request.
pub trait PayloadExtractor: Send + Sync {
    /// Recover the raw bytes reflected for `token` out of a cached response
    /// `body`, given the query parameter name the bytes were encoded under.
    fn extract(&self, body: &str, token: &str, data_param: &str) -> Option<Vec<u8>>;
}

#[cfg(test)]
pub(crate) mod stub {
    //! In-memory `CacheBackend` stub used by stream-layer and session tests.
    //! No network, no extraction — just a map with set-once semantics.

    use super::{CacheBackend, CacheOutcome, SetOutcome};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubCacheBackend {
        entries: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl StubCacheBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_count(&self) -> usize {
            self.entries.lock().expect("lock poisoned").len()
        }
    }

    #[async_trait]
    impl CacheBackend for StubCacheBackend {
        async fn get(&self, token: &str) -> Result<CacheOutcome> {
            let entries = self.entries.lock().expect("lock poisoned");
            Ok(match entries.get(token) {
                Some(v) => CacheOutcome::Hit(v.clone()),
                None => CacheOutcome::Miss,
            })
        }

        async fn set(&self, token: &str, value: &[u8]) -> Result<SetOutcome> {
            let mut entries = self.entries.lock().expect("lock poisoned");
            if let Some(existing) = entries.get(token) {
                return Ok(SetOutcome::AlreadyCached(existing.clone()));
            }
            entries.insert(token.to_string(), value.to_vec());
            Ok(SetOutcome::Ok)
        }
    }
}
