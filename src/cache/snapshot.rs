use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

/// Maps one raw entry to its cache key. Must be deterministic.
pub type KeyExtractor<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;

/// Immutable point-in-time view of the watched data.
///
/// Cloning is cheap; the map is shared and never mutated after it is built.
pub struct Snapshot<K, V> {
    entries: Arc<HashMap<K, V>>,
}

impl<K, V> Snapshot<K, V> {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
        }
    }

    pub(crate) const fn from_arc(entries: Arc<HashMap<K, V>>) -> Self {
        Self { entries }
    }

    pub(crate) fn as_arc(&self) -> Arc<HashMap<K, V>> {
        self.entries.clone()
    }

    /// True if both snapshots share the same underlying map
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<K, V> Clone for Snapshot<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Default for Snapshot<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K, V> Deref for Snapshot<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for Snapshot<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.entries == *other.entries
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Snapshot<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// Build a snapshot from one fetch's entries, in response order.
///
/// The first entry for a key wins; later duplicates are dropped with a warning.
pub fn build_snapshot<K, V>(entries: Vec<V>, extract_key: &(dyn Fn(&V) -> K + Send + Sync)) -> Snapshot<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries {
        let key = extract_key(&entry);
        if map.contains_key(&key) {
            warn!(key = ?key, "Duplicate key in response, keeping the first occurrence");
            continue;
        }
        map.insert(key, entry);
    }
    Snapshot::from_arc(Arc::new(map))
}
