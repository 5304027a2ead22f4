//! Generic TTL key-value store.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use super::janitor::{Janitor, Registration, Sweep};

struct Slot<V> {
    value: V,
    /// `None` when the store has no max age.
    expires_at: Option<Instant>,
}

impl<V> Slot<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// TTL-scoped map guarded by a single reader/writer lock.
///
/// # Properties
///
/// - Expired entries are never returned, whether or not they were swept
/// - A zero max age means entries never expire
/// - Locks are held only for the map access itself, never across an await
///
/// # Usage
///
/// ```
/// use rollcall_auth::ephemeral::EphemeralStore;
/// use std::time::Duration;
///
/// let store = EphemeralStore::new(Duration::from_secs(3600));
/// store.set("key", 1);
/// assert_eq!(store.get(&"key"), Some(1));
/// ```
pub struct EphemeralStore<K, V> {
    entries: RwLock<HashMap<K, Slot<V>>>,
    max_age: Duration,
    registration: Mutex<Option<Registration>>,
}

impl<K, V> EphemeralStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create a store that is not swept in the background.
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
            registration: Mutex::new(None),
        }
    }

    /// Create a store and register it with `janitor` for periodic sweeping.
    ///
    /// The janitor only holds a weak reference; dropping the last `Arc`
    /// is enough to stop sweeping, but [`close`](Self::close) also waits for
    /// an in-flight sweep to finish.
    pub fn with_janitor(max_age: Duration, janitor: &Janitor) -> Arc<Self>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let store = Arc::new(Self::new(max_age));
        let sweeper: Arc<dyn Sweep> = store.clone();
        let registration = janitor.register(Arc::downgrade(&sweeper));
        *store.registration.lock() = Some(registration);
        store
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn slot(&self, value: V, now: Instant) -> Slot<V> {
        let expires_at = if self.max_age.is_zero() {
            None
        } else {
            Some(now + self.max_age)
        };
        Slot { value, expires_at }
    }

    /// Get a live value.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone())
    }

    /// Insert or overwrite a value, resetting its expiry.
    pub fn set(&self, key: K, value: V) {
        let slot = self.slot(value, Instant::now());
        self.entries.write().insert(key, slot);
    }

    /// Insert `value` unless a live value already exists.
    ///
    /// Returns the current value and whether `value` was inserted. The check
    /// is repeated under the write lock, so of several concurrent callers
    /// exactly one observes `true`.
    pub fn get_or_set(&self, key: K, value: V) -> (V, bool) {
        if let Some(existing) = self.get(&key) {
            return (existing, false);
        }

        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.entry(key) {
            Entry::Occupied(slot) if slot.get().is_live(now) => (slot.get().value.clone(), false),
            Entry::Occupied(mut slot) => {
                slot.insert(self.slot(value.clone(), now));
                (value, true)
            }
            Entry::Vacant(slot) => {
                slot.insert(self.slot(value.clone(), now));
                (value, true)
            }
        }
    }

    /// Atomically remove and return a live value if `accept` approves it.
    ///
    /// A rejected value stays in place. An expired value is dropped and
    /// reported as absent.
    pub fn take_if(&self, key: &K, accept: impl FnOnce(&V) -> bool) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.write();

        let (live, accepted) = match entries.get(key) {
            None => return None,
            Some(slot) => {
                let live = slot.is_live(now);
                (live, live && accept(&slot.value))
            }
        };

        if !live {
            entries.remove(key);
            return None;
        }
        if !accepted {
            return None;
        }
        entries.remove(key).map(|slot| slot.value)
    }

    /// Remove and return a live value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.take_if(key, |_| true)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, slot| slot.is_live(now));
        before - entries.len()
    }

    /// Number of entries held, including expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deregister from the janitor and release all entries.
    ///
    /// Once this returns no sweep of this store is running or will run.
    pub async fn close(&self) {
        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            registration.deregister().await;
        }
        self.entries.write().clear();
    }
}

impl<K, V> Sweep for EphemeralStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}

impl<K, V> fmt::Debug for EphemeralStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralStore")
            .field("len", &self.entries.read().len())
            .field("max_age", &self.max_age)
            .finish()
    }
}
