/**
 * Long-poll watch cache
 *
 * Keeps a locally readable mirror of a remote key/value set fresh by issuing
 * blocking queries in a loop on one background task per cache.
 */
use super::config::CacheConfig;
use super::errors::{CacheError, FetchError, lock_poisoned_error};
use super::fetcher::{FetchRequest, FetchResponse, Fetcher};
use super::index::{Index, IndexAdvance, classify};
use super::listener::{Listener, ListenerId, ListenerRegistry};
use super::query::{QueryOptions, watch_params};
use super::snapshot::{KeyExtractor, Snapshot, build_snapshot};
use super::state::{CacheState, Lifecycle};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters describing the poll loop so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub unchanged_polls: u64,
    pub published_snapshots: u64,
    pub last_index: Option<Index>,
    pub last_contact: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Published,
    Unchanged,
    Failed,
}

/// Bookkeeping for one fetch, used for throttling and logging only
struct PollCycle {
    requested: Option<Index>,
    started: Instant,
}

impl PollCycle {
    fn begin(requested: Option<Index>) -> Self {
        Self {
            requested,
            started: Instant::now(),
        }
    }
}

/// Worker-local resume state
struct Cursor<K, V> {
    index: Option<Index>,
    published: Option<Snapshot<K, V>>,
}

struct Inner<K, V> {
    source: String,
    fetcher: Arc<dyn Fetcher<Entry = V>>,
    extract_key: KeyExtractor<K, V>,
    config: CacheConfig,
    base_options: QueryOptions,
    current: ArcSwap<HashMap<K, V>>,
    listeners: ListenerRegistry<K, V>,
    lifecycle: Lifecycle,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: RwLock<WatchStats>,
}

/// A locally readable, eventually consistent mirror of a remote key/value set.
///
/// Constructed latent; `start` spawns the poll loop on the current tokio runtime.
/// Dropping the cache stops it.
pub struct WatchCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> fmt::Debug for WatchCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchCache")
            .field("source", &self.inner.source)
            .field("state", &self.inner.lifecycle.current())
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> WatchCache<K, V>
where
    K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    /// Create a latent cache.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if `config` fails validation
    pub fn new<F>(
        fetcher: F,
        extract_key: impl Fn(&V) -> K + Send + Sync + 'static,
        config: CacheConfig,
        base_options: QueryOptions,
    ) -> Result<Self, CacheError>
    where
        F: Fetcher<Entry = V>,
    {
        config.validate()?;
        let source = fetcher.describe();

        Ok(Self {
            inner: Arc::new(Inner {
                source,
                fetcher: Arc::new(fetcher),
                extract_key: Arc::new(extract_key),
                config,
                base_options,
                current: ArcSwap::from_pointee(HashMap::new()),
                listeners: ListenerRegistry::new(),
                lifecycle: Lifecycle::new(),
                token: CancellationToken::new(),
                worker: Mutex::new(None),
                stats: RwLock::new(WatchStats::default()),
            }),
        })
    }

    /// Spawn the poll loop. Returns without waiting for the first fetch.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LifecycleMisuse` unless the cache is latent, and
    /// `CacheError::NoRuntime` outside a tokio runtime
    pub fn start(&self) -> Result<(), CacheError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        self.inner.lifecycle.begin_start()?;

        let inner = self.inner.clone();
        let task = runtime.spawn(async move { inner.run().await });

        let mut worker = self
            .inner
            .worker
            .lock()
            .map_err(|_| lock_poisoned_error("worker handle"))?;
        *worker = Some(task);
        drop(worker);

        info!(source = %self.inner.source, "Watch cache starting");
        Ok(())
    }
}

impl<K, V> WatchCache<K, V> {
    /// Stop polling. Idempotent, callable from any state and from inside a listener.
    pub fn stop(&self) {
        if self.inner.lifecycle.mark_stopped() {
            info!(source = %self.inner.source, "Watch cache stopped");
        }
        self.inner.token.cancel();
    }

    /// Stop and wait for the poll loop to exit. Do not call from inside a listener.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.inner.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(source = %self.inner.source, error = %e, "Poll loop ended abnormally");
            }
        }
    }

    /// Register a listener. If a snapshot has been published it is delivered before this
    /// returns, unless the cache is stopped by the time delivery would happen.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LockPoisoned` if the registry was poisoned by a panic
    pub fn add_listener(&self, listener: impl Listener<K, V> + 'static) -> Result<ListenerId, CacheError> {
        let lifecycle = &self.inner.lifecycle;
        self.inner
            .listeners
            .add(Arc::new(listener), || !lifecycle.is_stopped())
    }

    /// # Errors
    ///
    /// Returns `CacheError::LockPoisoned` if the registry was poisoned by a panic
    pub fn remove_listener(&self, id: ListenerId) -> Result<bool, CacheError> {
        self.inner.listeners.remove(id)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// The current snapshot; empty before the first publish.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<K, V> {
        Snapshot::from_arc(self.inner.current.load_full())
    }

    /// Wait up to `timeout` for the first completed fetch.
    pub async fn await_initialized(&self, timeout: Duration) -> bool {
        self.inner.lifecycle.await_initialized(timeout).await
    }

    #[must_use]
    pub fn state(&self) -> CacheState {
        self.inner.lifecycle.current()
    }

    #[must_use]
    pub fn stats(&self) -> WatchStats {
        self.inner
            .stats
            .read()
            .map_or_else(|_| WatchStats::default(), |stats| stats.clone())
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl<K, V> Drop for WatchCache<K, V> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    async fn run(self: Arc<Self>) {
        info!(source = %self.source, watch_seconds = self.config.watch_seconds(), "Poll loop started");
        let mut cursor = Cursor {
            index: None,
            published: None,
        };

        while !self.token.is_cancelled() {
            let cycle = PollCycle::begin(cursor.index);

            let fetched = tokio::select! {
                () = self.token.cancelled() => break,
                result = self.fetch_once(cycle.requested) => result,
            };

            let outcome = match fetched {
                Ok(response) => self.apply(response, &mut cursor),
                Err(err) => {
                    self.record(|stats| stats.failed_polls += 1);
                    self.config
                        .refresh_error_log
                        .log(&format!("Error getting response from {}", self.source), &err);
                    PollOutcome::Failed
                }
            };

            debug!(
                source = %self.source,
                requested = ?cycle.requested,
                outcome = ?outcome,
                elapsed_ms = cycle.started.elapsed().as_millis(),
                "Poll cycle complete"
            );

            if outcome == PollOutcome::Failed && !self.pause(self.config.backoff_delay).await {
                break;
            }

            let elapsed = cycle.started.elapsed();
            if let Some(remaining) = self.config.min_delay_between_requests.checked_sub(elapsed) {
                if !remaining.is_zero() && !self.pause(remaining).await {
                    break;
                }
            }
        }

        info!(source = %self.source, "Poll loop exited");
    }

    async fn fetch_once(&self, index: Option<Index>) -> Result<FetchResponse<V>, CacheError> {
        let options = watch_params(index, self.config.watch_seconds(), &self.base_options)?;
        let read_timeout = self.config.read_timeout();
        let request = FetchRequest {
            options,
            read_timeout,
            cancellation: self.token.child_token(),
        };

        let fetch = self.fetcher.fetch(request);
        let response = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| FetchError::Timeout(limit))?,
            None => fetch.await,
        }?;
        Ok(response)
    }

    fn apply(&self, response: FetchResponse<V>, cursor: &mut Cursor<K, V>) -> PollOutcome {
        if self.token.is_cancelled() {
            return PollOutcome::Unchanged;
        }
        self.record(|stats| {
            stats.successful_polls += 1;
            stats.last_contact = Some(Instant::now());
        });

        let next_index = match classify(cursor.index, response.index) {
            IndexAdvance::Unchanged if cursor.published.is_some() => {
                self.record(|stats| stats.unchanged_polls += 1);
                return PollOutcome::Unchanged;
            }
            IndexAdvance::Reset => {
                warn!(
                    source = %self.source,
                    last = ?cursor.index,
                    returned = %response.index,
                    "Index went backwards, restarting the watch without an index"
                );
                None
            }
            IndexAdvance::Advanced(index) => Some(index),
            IndexAdvance::Unchanged => Some(response.index),
        };

        let candidate = build_snapshot(response.entries, self.extract_key.as_ref());
        cursor.index = next_index;
        self.record(|stats| stats.last_index = next_index);

        let changed = cursor
            .published
            .as_ref()
            .is_none_or(|published| *published != candidate);

        if !changed {
            self.lifecycle.mark_started();
            self.record(|stats| stats.unchanged_polls += 1);
            return PollOutcome::Unchanged;
        }

        self.current.store(candidate.as_arc());
        if self.lifecycle.mark_started() {
            info!(source = %self.source, entries = candidate.len(), "Watch cache initialized");
        }

        match self.listeners.publish(&candidate, || !self.token.is_cancelled()) {
            Ok(delivered) => debug!(
                source = %self.source,
                entries = candidate.len(),
                delivered,
                "Published snapshot"
            ),
            Err(e) => warn!(source = %self.source, error = %e, "Failed to publish snapshot"),
        }
        self.record(|stats| stats.published_snapshots += 1);
        cursor.published = Some(candidate);
        PollOutcome::Published
    }

    /// Sleep unless stopped first. Returns false if the cache was stopped.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.token.cancelled() => false,
            () = sleep(duration) => true,
        }
    }

    fn record(&self, update: impl FnOnce(&mut WatchStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}
