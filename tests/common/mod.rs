//! In-memory long-poll source for driving watch caches in tests.
#![allow(dead_code)]

use async_trait::async_trait;
use consulwatch::cache::{FetchError, FetchRequest, FetchResponse, Fetcher, Index, Snapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
struct Contents {
    index: u64,
    entries: BTreeMap<String, String>,
}

/// One request as the source saw it
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub index: Option<Index>,
    pub wait: Option<String>,
    pub at: Instant,
}

/// Mutable key/value set with blocking-query semantics.
///
/// A request without an index, or with one that differs from the current index,
/// is answered at once. Otherwise the answer waits until the contents change or
/// the requested wait elapses.
pub struct MemorySource {
    contents: watch::Sender<Contents>,
    failures: AtomicUsize,
    requests: Mutex<Vec<SeenRequest>>,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        let (contents, _) = watch::channel(Contents {
            index: 1,
            entries: BTreeMap::new(),
        });
        Arc::new(Self {
            contents,
            failures: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn put(&self, key: &str, value: &str) {
        self.contents.send_modify(|contents| {
            contents.index += 1;
            contents.entries.insert(key.to_string(), value.to_string());
        });
    }

    pub fn delete(&self, key: &str) {
        self.contents.send_modify(|contents| {
            contents.index += 1;
            contents.entries.remove(key);
        });
    }

    /// Advance the index without changing any entry
    pub fn touch(&self) {
        self.contents.send_modify(|contents| contents.index += 1);
    }

    /// Move the index backwards, as a restored snapshot on the server would
    pub fn rewind_index(&self, index: u64) {
        self.contents.send_modify(|contents| contents.index = index);
    }

    pub fn index(&self) -> u64 {
        self.contents.borrow().index
    }

    /// Fail the next `count` requests
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fetcher(self: &Arc<Self>) -> MemoryFetcher {
        MemoryFetcher {
            source: self.clone(),
        }
    }

    fn respond(&self) -> FetchResponse<Entry> {
        let contents = self.contents.borrow();
        let entries = contents
            .entries
            .iter()
            .map(|(key, value)| Entry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        FetchResponse::new(entries, Index::new(contents.index))
    }
}

pub struct MemoryFetcher {
    source: Arc<MemorySource>,
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    type Entry = Entry;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse<Entry>, FetchError> {
        self.source.requests.lock().unwrap().push(SeenRequest {
            index: request.index(),
            wait: request.options.wait.clone(),
            at: Instant::now(),
        });

        let injected = self
            .source
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(FetchError::Source("injected failure".to_string()));
        }

        if let Some(requested) = request.index() {
            let wait = parse_wait(request.options.wait.as_deref());
            let mut rx = self.source.contents.subscribe();
            let _ = tokio::time::timeout(
                wait,
                rx.wait_for(|contents| contents.index != requested.value()),
            )
            .await;
        }
        Ok(self.source.respond())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

fn parse_wait(wait: Option<&str>) -> Duration {
    wait.and_then(|w| w.strip_suffix('s'))
        .and_then(|secs| secs.parse().ok())
        .map_or(Duration::from_secs(300), Duration::from_secs)
}

pub fn by_key(entry: &Entry) -> String {
    entry.key.clone()
}

/// Listener that keeps every snapshot it is given
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Snapshot<String, Entry>>>>,
}

impl Recorder {
    pub fn listener(&self) -> impl Fn(&Snapshot<String, Entry>) -> anyhow::Result<()> + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |snapshot: &Snapshot<String, Entry>| {
            seen.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn snapshots(&self) -> Vec<Snapshot<String, Entry>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Snapshot<String, Entry>> {
        self.seen.lock().unwrap().last().cloned()
    }

    /// Poll until at least `count` snapshots arrived. Returns false on timeout.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count() >= count
    }
}

/// Source that accepts a request and never answers it
pub struct StalledFetcher;

#[async_trait]
impl Fetcher for StalledFetcher {
    type Entry = Entry;

    async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse<Entry>, FetchError> {
        std::future::pending().await
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}
