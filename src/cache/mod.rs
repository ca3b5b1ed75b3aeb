pub mod config;
pub mod errors;
pub mod fetcher;
pub mod index;
pub mod listener;
pub mod query;
pub mod snapshot;
pub mod state;
pub mod watch_cache;

pub use config::{CacheConfig, RefreshErrorLog};
pub use errors::{CacheError, FetchError};
pub use fetcher::{FetchRequest, FetchResponse, Fetcher};
pub use index::Index;
pub use listener::{Listener, ListenerId, ListenerRegistry};
pub use query::{ConsistencyMode, QueryOptions, watch_params};
pub use snapshot::{KeyExtractor, Snapshot, build_snapshot};
pub use state::CacheState;
pub use watch_cache::{WatchCache, WatchStats};
