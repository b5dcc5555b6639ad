//! Byte-oriented I/O layered on top of [`crate::session::Session`] and
//! [`crate::backend::CacheBackend`]: reliable reads that stop at the stack
//! top, chunked writes that recover colliding peer data instead of losing
//! it, and a background poller that ties the two together.

mod duplex;
mod reader;
mod writer;

pub use duplex::DuplexStream;
pub use reader::Reader;
pub use writer::Writer;
