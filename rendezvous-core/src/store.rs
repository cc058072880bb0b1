use parking_lot::Mutex;
use std::collections::hash_map;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{clamp_ttl, StoreConfig};
use crate::entry::{Entry, Rendezvous, Settle, Side};
use crate::error::{DomainFailure, SlotError, StoreError};
use crate::listener::{EvictionListener, EvictionReason};
use crate::slot::{Observer, Outcome, SharedObserver};
use crate::sweeper;
use crate::Key;

/// Monotonic counters, updated with relaxed ordering (informational only)
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) reconciled: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) disposed: AtomicU64,
    pub(crate) erased: AtomicU64,
}

/// Point-in-time view of a store's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Entries currently registered
    pub live: usize,
    /// Entries removed because both the delivery and the request happened
    pub reconciled: u64,
    /// Entries reclaimed by the sweeper
    pub expired: u64,
    /// Waiting entries failed by `dispose`
    pub disposed: u64,
    /// Entries removed through `erase`
    pub erased: u64,
}

/// Internal shared state for the store
pub(crate) struct StoreInner<T> {
    pub(crate) entries: Mutex<HashMap<Key, Entry<T>>>,
    pub(crate) ttl: Duration,
    pub(crate) listener: Arc<dyn EvictionListener>,
    pub(crate) counters: Counters,
    /// Sender to signal shutdown to the sweeper task
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T> StoreInner<T> {
    /// Tells the listener about evicted keys. Must be called without the entries lock held.
    ///
    /// A panicking listener is logged and skipped so the sweeper keeps running.
    pub(crate) fn notify(&self, keys: &[Key], reason: EvictionReason) {
        for &key in keys {
            let call = AssertUnwindSafe(|| self.listener.on_evicted(key, reason));
            if panic::catch_unwind(call).is_err() {
                tracing::error!(key, %reason, "eviction listener panicked");
            }
        }
    }
}

/// Keyed store of pending results with rendezvous bookkeeping and TTL expiration
///
/// A caller registers a key with [`init`](AsyncStore::init). A producer then completes
/// it with [`deliver`](AsyncStore::deliver) (or a failure), and a consumer obtains an
/// [`Observer`] with [`request`](AsyncStore::request). The two may happen in either
/// order; the entry is removed as soon as both have happened. Entries that see no
/// activity for the configured TTL are failed with [`SlotError::Expired`] and removed
/// by a background sweeper task.
///
/// Every operation holds a single lock for a short, non-blocking critical section.
/// Waiting for a result happens on the observer, outside the lock.
///
/// `AsyncStore` is a cheap handle: clones share the same entries and sweeper.
///
/// # Example
///
/// ```rust,no_run
/// use rendezvous_core::{AsyncStore, StoreConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store: AsyncStore<String> = AsyncStore::with_config(
///         StoreConfig::default().with_ttl_seconds(30),
///     );
///
///     store.init(7)?;
///     let observer = store.request(7)?;
///     store.deliver(7, "done".to_string())?;
///
///     assert_eq!(observer.await?, "done");
///     assert!(store.is_empty());
///     Ok(())
/// }
/// ```
pub struct AsyncStore<T> {
    pub(crate) inner: Arc<StoreInner<T>>,
}

impl<T> Clone for AsyncStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> AsyncStore<T> {
    /// Creates a new store with default configuration (60 second TTL)
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. The store requires
    /// a runtime to spawn its background sweeper task.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a new store with custom configuration
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. The store requires
    /// a runtime to spawn its background sweeper task.
    pub fn with_config(config: StoreConfig) -> Self {
        if tokio::runtime::Handle::try_current().is_err() {
            panic!(
                "rendezvous_core::AsyncStore requires a Tokio runtime. \
                 Ensure you are calling AsyncStore::new() or AsyncStore::with_config() \
                 from within a #[tokio::main] or #[tokio::test] context, \
                 or from code running on a Tokio runtime."
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(StoreInner {
            entries: Mutex::new(HashMap::new()),
            ttl: clamp_ttl(config.ttl),
            listener: config.listener,
            counters: Counters::default(),
            shutdown_tx,
            sweeper: Mutex::new(None),
        });

        // The sweeper only holds a weak reference so that dropping the last
        // handle tears the store down.
        let handle = tokio::spawn(sweeper::run(Arc::downgrade(&inner), shutdown_rx));
        *inner.sweeper.lock() = Some(handle);

        Self { inner }
    }

    /// Registers a pending computation under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if `key` is still live. The live entry is
    /// left untouched.
    pub fn init(&self, key: Key) -> Result<(), StoreError> {
        let mut entries = self.inner.entries.lock();
        match entries.entry(key) {
            hash_map::Entry::Occupied(_) => Err(StoreError::DuplicateKey(key)),
            hash_map::Entry::Vacant(vacant) => {
                vacant.insert(Entry::new(key, Instant::now()));
                tracing::debug!(key, "INIT");
                Ok(())
            }
        }
    }

    /// Completes `key` with a value
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownKey` if `key` is not registered
    /// - `StoreError::AlreadyDelivered` if a result was already delivered for `key`
    pub fn deliver(&self, key: Key, payload: T) -> Result<(), StoreError> {
        self.complete(key, Ok(payload))
    }

    /// Completes `key` with a producer failure. Observers receive it as
    /// [`SlotError::Failed`].
    ///
    /// # Errors
    ///
    /// Same as [`deliver`](AsyncStore::deliver).
    pub fn deliver_failure(
        &self,
        key: Key,
        failure: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Result<(), StoreError> {
        self.complete(key, Err(SlotError::Failed(DomainFailure::new(failure))))
    }

    fn complete(&self, key: Key, outcome: Outcome<T>) -> Result<(), StoreError> {
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(&key).ok_or(StoreError::UnknownKey(key))?;
        entry.check(key, Side::Delivery)?;

        entry.slot.complete(outcome);
        entry.touch(Instant::now());
        let settle = entry.advance(Side::Delivery);
        if settle == Settle::Erase {
            entries.remove(&key);
            self.inner.counters.reconciled.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(key, ?settle, "DELIVER");
        Ok(())
    }

    /// Hands out the observer for `key`'s eventual result.
    ///
    /// The observer stays valid after the entry is removed from the store.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownKey` if `key` is not registered
    /// - `StoreError::AlreadyRequested` if the observer was already handed out
    pub fn request(&self, key: Key) -> Result<Observer<T>, StoreError> {
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(&key).ok_or(StoreError::UnknownKey(key))?;
        entry.check(key, Side::Request)?;

        let observer = entry.slot.observe().ok_or(StoreError::AlreadyRequested(key))?;
        entry.touch(Instant::now());
        let settle = entry.advance(Side::Request);
        if settle == Settle::Erase {
            entries.remove(&key);
            self.inner.counters.reconciled.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(key, ?settle, "REQUEST");
        Ok(observer)
    }

    /// Like [`request`](AsyncStore::request), but the handle can be cloned and read by
    /// any number of consumers.
    pub fn request_shared(&self, key: Key) -> Result<SharedObserver<T>, StoreError>
    where
        T: Clone,
    {
        self.request(key).map(Observer::shared)
    }

    /// Removes `key` regardless of its rendezvous state.
    ///
    /// Returns `true` if the key existed. An observer whose result was never delivered
    /// resolves to [`SlotError::Abandoned`].
    pub fn erase(&self, key: Key) -> bool {
        let removed = self.inner.entries.lock().remove(&key);
        tracing::debug!(key, existed = removed.is_some(), "ERASE");
        match removed {
            Some(_) => {
                self.inner.counters.erased.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Removes every entry from the store.
    ///
    /// Entries with an observer still waiting for delivery are first failed with
    /// [`SlotError::Disposed`], so their consumers are released before this returns.
    /// Returns the number of entries removed.
    pub fn dispose(&self) -> usize {
        let mut disposed = Vec::new();
        let removed = {
            let mut entries = self.inner.entries.lock();
            for (&key, entry) in entries.iter_mut() {
                if entry.rendezvous() == Rendezvous::AwaitingDelivery
                    && entry.slot.complete(Err(SlotError::Disposed { key }))
                {
                    disposed.push(key);
                }
            }
            let removed = entries.len();
            entries.clear();
            removed
        };

        self.inner
            .counters
            .disposed
            .fetch_add(disposed.len() as u64, Ordering::Relaxed);
        tracing::debug!(removed, waiting = disposed.len(), "DISPOSE");
        self.inner.notify(&disposed, EvictionReason::Disposed);
        removed
    }

    /// Runs one expiration pass immediately and returns the number of entries expired.
    ///
    /// This is also done automatically by the background sweeper.
    pub fn sweep(&self) -> usize {
        self.inner.expire_idle(Instant::now()).expired
    }

    /// Returns `true` if `key` is registered
    #[must_use]
    pub fn contains_key(&self, key: Key) -> bool {
        self.inner.entries.lock().contains_key(&key)
    }

    /// Returns where `key` stands in its rendezvous, or `None` if it is not registered
    pub fn rendezvous(&self, key: Key) -> Option<Rendezvous> {
        self.inner.entries.lock().get(&key).map(Entry::rendezvous)
    }

    /// Returns the registered keys in ascending order
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.inner.entries.lock().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the number of registered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns `true` if the store holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn stats(&self) -> StoreStats {
        let counters = &self.inner.counters;
        StoreStats {
            live: self.len(),
            reconciled: counters.reconciled.load(Ordering::Relaxed),
            expired: counters.expired.load(Ordering::Relaxed),
            disposed: counters.disposed.load(Ordering::Relaxed),
            erased: counters.erased.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` while the background sweeper task is alive
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the background sweeper and waits for it to exit.
    ///
    /// Entries stay in the store but no longer expire. This is called implicitly
    /// (without waiting) when the last handle is dropped. Concurrent callers all
    /// return once the sweeper has exited; calling it again afterwards is a no-op.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self.inner.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "sweeper task ended abnormally");
            }
        }
        // Another caller may hold the handle; the sweeper drops its receiver on exit
        self.inner.shutdown_tx.closed().await;
    }
}

impl AsyncStore<()> {
    /// Completes `key` without a payload
    pub fn deliver_unit(&self, key: Key) -> Result<(), StoreError> {
        self.deliver(key, ())
    }
}

impl<T: Send + 'static> Default for AsyncStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for StoreInner<T> {
    fn drop(&mut self) {
        // Signal the sweeper to stop when the store is dropped
        let _ = self.shutdown_tx.send(true);
    }
}
