/**
 * Error types for the watch cache engine and helpers for creating common ones
 */
use super::state::CacheState;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// `start()` called while the cache is not latent
    #[error("cache cannot be started from state {current}")]
    LifecycleMisuse { current: CacheState },

    /// Invalid cache configuration
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// Base query options carry a field owned by the cache
    #[error("base query options must not set `{0}`, it is managed by the cache")]
    InvalidQueryOptions(&'static str),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Mutex poisoning (indicates prior panic)
    #[error("{0}")]
    LockPoisoned(String),

    #[error("no tokio runtime available to spawn the poll loop")]
    NoRuntime,
}

impl CacheError {
    /// `WARN` for transient fetch failures, `ERROR` for everything else
    #[must_use]
    pub const fn severity(&self) -> Level {
        match self {
            Self::Fetch(_) => Level::WARN,
            _ => Level::ERROR,
        }
    }
}

/// Failures of a single blocking query. All of them are transient for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("source responded with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("blocking query did not complete within {0:?}")]
    Timeout(Duration),

    #[error("response carried no index")]
    MissingIndex,

    #[error("{0}")]
    Source(String),
}

/// Create a `LifecycleMisuse` error for a start attempt from `current`
#[must_use]
pub const fn lifecycle_misuse_error(current: CacheState) -> CacheError {
    CacheError::LifecycleMisuse { current }
}

/// Create a `Config` error for an invalid `field`
#[must_use]
pub fn config_error(field: &str, reason: &str) -> CacheError {
    CacheError::Config(format!("{field}: {reason}"))
}

/// Create a `LockPoisoned` error for mutex poisoning (indicates prior panic)
#[must_use]
pub fn lock_poisoned_error(message: &str) -> CacheError {
    CacheError::LockPoisoned(format!(
        "{message} - this indicates a prior panic, cache may be in an inconsistent state"
    ))
}
