pub mod cache;
pub mod consul;
pub mod error;

pub use cache::{
    CacheConfig, CacheError, CacheState, FetchError, FetchRequest, FetchResponse, Fetcher, Index, Listener, ListenerId,
    QueryOptions, Snapshot, WatchCache, WatchStats,
};
pub use error::{Error, Result};
