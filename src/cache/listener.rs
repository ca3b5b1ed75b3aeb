use super::errors::{CacheError, lock_poisoned_error};
use super::snapshot::Snapshot;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives every snapshot the cache publishes.
///
/// Callbacks run synchronously on the poll loop, one at a time. A returned error
/// or a panic is logged and does not affect other listeners.
pub trait Listener<K, V>: Send + Sync {
    /// # Errors
    ///
    /// Any error is logged by the cache and otherwise ignored
    fn notify(&self, snapshot: &Snapshot<K, V>) -> anyhow::Result<()>;
}

impl<K, V, F> Listener<K, V> for F
where
    F: Fn(&Snapshot<K, V>) -> anyhow::Result<()> + Send + Sync,
{
    fn notify(&self, snapshot: &Snapshot<K, V>) -> anyhow::Result<()> {
        self(snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type SharedListener<K, V> = Arc<dyn Listener<K, V>>;

struct Registered<K, V> {
    id: ListenerId,
    listener: SharedListener<K, V>,
}

struct RegistryState<K, V> {
    listeners: Vec<Registered<K, V>>,
    latest: Option<Snapshot<K, V>>,
}

/// Ordered listener set with race-free late-join delivery.
///
/// `state` guards the list and the latest published snapshot and is only held briefly.
/// `delivery` serializes every callback invocation: a publish holds it across the whole
/// fan-out and a late join holds it across its catch-up call, so a listener sees snapshots
/// in production order, never concurrently, and never the same snapshot twice.
pub struct ListenerRegistry<K, V> {
    state: Mutex<RegistryState<K, V>>,
    delivery: Mutex<()>,
}

impl<K, V> Default for ListenerRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ListenerRegistry<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                listeners: Vec::new(),
                latest: None,
            }),
            delivery: Mutex::new(()),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, RegistryState<K, V>>, CacheError> {
        self.state
            .lock()
            .map_err(|_| lock_poisoned_error("listener registry"))
    }

    fn lock_delivery(&self) -> Result<MutexGuard<'_, ()>, CacheError> {
        self.delivery
            .lock()
            .map_err(|_| lock_poisoned_error("listener delivery"))
    }

    /// Register `listener`. If a snapshot was already published and `deliver_latest`
    /// still holds once the delivery lock is taken, it is delivered to `listener`
    /// before this returns.
    ///
    /// Blocks while a publish is delivering. Calling it from inside a listener callback
    /// deadlocks; register from outside the callback instead.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LockPoisoned` if a previous holder of the registry panicked
    pub fn add(
        &self,
        listener: SharedListener<K, V>,
        deliver_latest: impl Fn() -> bool,
    ) -> Result<ListenerId, CacheError> {
        let _delivery = self.lock_delivery()?;
        let id = ListenerId::new();
        let latest = {
            let mut state = self.lock_state()?;
            state.listeners.push(Registered {
                id,
                listener: listener.clone(),
            });
            state.latest.clone()
        };

        // Evaluated under the delivery lock: a stop observed here must suppress delivery
        if let Some(snapshot) = latest.filter(|_| deliver_latest()) {
            debug!(listener = %id, entries = snapshot.len(), "Delivering latest snapshot to new listener");
            invoke(id, listener.as_ref(), &snapshot);
        }
        Ok(id)
    }

    /// Unregister a listener. Safe to call from inside a callback.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LockPoisoned` if a previous holder of the registry panicked
    pub fn remove(&self, id: ListenerId) -> Result<bool, CacheError> {
        let mut state = self.lock_state()?;
        let before = state.listeners.len();
        state.listeners.retain(|registered| registered.id != id);
        Ok(state.listeners.len() != before)
    }

    /// Record `snapshot` as the latest and deliver it to every listener in registration order.
    ///
    /// `keep_going` is checked before each callback so a stop requested mid-publish
    /// prevents the remaining deliveries.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LockPoisoned` if a previous holder of the registry panicked
    pub fn publish(&self, snapshot: &Snapshot<K, V>, keep_going: impl Fn() -> bool) -> Result<usize, CacheError> {
        let _delivery = self.lock_delivery()?;
        let targets: Vec<(ListenerId, SharedListener<K, V>)> = {
            let mut state = self.lock_state()?;
            state.latest = Some(snapshot.clone());
            state
                .listeners
                .iter()
                .map(|registered| (registered.id, registered.listener.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, listener) in targets {
            if !keep_going() {
                debug!("Publish interrupted by stop, skipping remaining listeners");
                break;
            }
            invoke(id, listener.as_ref(), snapshot);
            delivered += 1;
        }
        Ok(delivered)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().map_or(0, |state| state.listeners.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invoke<K, V>(id: ListenerId, listener: &dyn Listener<K, V>, snapshot: &Snapshot<K, V>) {
    match catch_unwind(AssertUnwindSafe(|| listener.notify(snapshot))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(listener = %id, error = %e, "Listener failed to handle snapshot"),
        Err(payload) => warn!(
            listener = %id,
            panic = panic_message(payload.as_ref()),
            "Listener panicked while handling snapshot"
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
