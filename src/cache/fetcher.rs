use super::errors::FetchError;
use super::index::Index;
use super::query::QueryOptions;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One blocking query, fully parameterised by the poll loop.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Base options with `index` and `wait` filled in
    pub options: QueryOptions,
    /// Read timeout the underlying transport should use, if auto-adjustment is on
    pub read_timeout: Option<Duration>,
    /// Cancelled when the cache stops
    pub cancellation: CancellationToken,
}

impl FetchRequest {
    #[must_use]
    pub const fn index(&self) -> Option<Index> {
        self.options.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse<E> {
    pub entries: Vec<E>,
    pub index: Index,
}

impl<E> FetchResponse<E> {
    #[must_use]
    pub const fn new(entries: Vec<E>, index: Index) -> Self {
        Self { entries, index }
    }
}

/// Performs blocking queries against the authoritative source.
///
/// The poll loop drops the returned future when the cache stops, so an
/// implementation only needs to be cancel-safe at await points.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type Entry: Send + Sync + 'static;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse<Self::Entry>, FetchError>;

    /// Short label used in logs
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
