//! Error type for the tunnel engine and its CLI driver.

use thiserror::Error;

/// All failure modes that can surface across the cache-tunnel crate.
///
/// `NotCached` and `AlreadyCached` from the underlying protocol are
/// deliberately NOT represented here: they are normal control-flow signals
/// inside [`crate::backend::CacheOutcome`] / [`crate::backend::SetOutcome`],
/// never exceptions. Only genuine failures live in this enum.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid target URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("cache server returned status {0}")]
    BadStatus(reqwest::StatusCode),

    /// Invalid CLI arguments, or a target that doesn't behave the way the
    /// protocol expects (e.g. the `--check` round-trip probe not reading
    /// back what it wrote).
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
