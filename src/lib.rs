//! cache-tunnel
//!
//! Turns a vulnerable reflected-response web cache into a low-bandwidth,
//! bidirectional byte channel. Two peers that never talk to each other
//! directly agree on a channel id, derive the same sequence of cache keys,
//! and use the cache's HIT/MISS behavior as a synchronization primitive.
//!
//! # Layers
//!
//! - [`backend`]: treats the target as a `token -> bytes` map ([`backend::CacheBackend`]).
//! - [`session`]: derives the deterministic token sequence for one channel ([`session::Session`]).
//! - [`stream`]: byte-oriented read/write and the background poller ([`stream::DuplexStream`]).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cache_tunnel::backend::{HttpCacheBackend, HttpCacheConfig, ReflectedUrlExtractor};
//! use cache_tunnel::stream::DuplexStream;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HttpCacheConfig::new(Url::parse("https://target.example/search")?, "key");
//!     let backend = Arc::new(HttpCacheBackend::new(config, Arc::new(ReflectedUrlExtractor::new()))?);
//!
//!     let mut stream = DuplexStream::new(backend, 100, 0xFFFF, 1024, Duration::from_secs(1));
//!     stream.spawn_polling(|bytes| {
//!         print!("{}", String::from_utf8_lossy(&bytes));
//!     });
//!
//!     stream.write(b"hello\n").await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod session;
pub mod stream;
mod token;

pub use backend::{CacheBackend, CacheOutcome, HttpCacheBackend, HttpCacheConfig, PayloadExtractor, SetOutcome};
pub use error::{Result, TunnelError};
pub use session::Session;
pub use stream::{DuplexStream, Reader, Writer};
