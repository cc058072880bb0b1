//! Background expiration of idle entries.
//!
//! One task per store. Each pass fails and removes every entry that has been idle
//! for longer than the TTL, then sleeps until just past the point where the oldest
//! survivor could expire (or one TTL from now when nothing survives). A shutdown signal on the watch channel
//! interrupts the sleep.

use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::SlotError;
use crate::listener::EvictionReason;
use crate::store::StoreInner;

/// Result of one expiration pass
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sweep {
    pub(crate) expired: usize,
    pub(crate) next_wake: Instant,
}

impl<T> StoreInner<T> {
    pub(crate) fn expire_idle(&self, now: Instant) -> Sweep {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        let mut oldest: Option<Instant> = None;

        self.entries.lock().retain(|&key, entry| {
            if entry.is_expired(now, ttl) {
                tracing::trace!(key, delivered = entry.slot.is_completed(), "expiring entry");
                // Already completed (delivered but never requested) is fine;
                // the value is dropped with the entry.
                entry.slot.complete(Err(SlotError::Expired { key }));
                expired.push(key);
                false
            } else {
                let touched = entry.last_touch();
                oldest = Some(oldest.map_or(touched, |o| o.min(touched)));
                true
            }
        });

        if !expired.is_empty() {
            self.counters
                .expired
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            self.notify(&expired, EvictionReason::Expired);
        }

        Sweep {
            expired: expired.len(),
            // Expiry needs idle time strictly past the TTL
            next_wake: oldest.map_or(now + ttl, |touched| {
                touched + ttl + Duration::from_nanos(1)
            }),
        }
    }
}

/// Sweeper task body. Exits on shutdown, when the sender is dropped, or once the
/// store state is gone.
pub(crate) async fn run<T: Send + 'static>(
    store: Weak<StoreInner<T>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!("sweeper started");

    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }
        let Some(inner) = store.upgrade() else {
            break;
        };
        let sweep = inner.expire_idle(Instant::now());
        drop(inner);

        if sweep.expired > 0 {
            tracing::debug!(expired = sweep.expired, "sweep pass");
        }

        tokio::select! {
            _ = tokio::time::sleep_until(sweep.next_wake) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // Sender dropped with the store
                    break;
                }
            }
        }
    }

    tracing::debug!("sweeper stopped");
}

#[cfg(test)]
mod tests {
    use crate::{AsyncStore, Rendezvous, SlotError, StoreConfig};
    use std::time::Duration;
    use tokio::time::Instant;

    fn store_with_ttl(seconds: u64) -> AsyncStore<u32> {
        AsyncStore::with_config(StoreConfig::default().with_ttl_seconds(seconds))
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_wake_follows_oldest_entry() {
        let store = store_with_ttl(10);
        store.shutdown().await;

        let start = Instant::now();
        store.init(1).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        store.init(2).unwrap();

        let sweep = store.inner.expire_idle(Instant::now());
        assert_eq!(sweep.expired, 0);
        assert_eq!(
            sweep.next_wake,
            start + Duration::from_secs(10) + Duration::from_nanos(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_wake_when_empty_is_one_ttl_away() {
        let store = store_with_ttl(3);
        store.shutdown().await;

        let now = Instant::now();
        let sweep = store.inner.expire_idle(now);
        assert_eq!(sweep.expired, 0);
        assert_eq!(sweep.next_wake, now + Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_expires_only_idle_entries() {
        let store = store_with_ttl(5);
        store.shutdown().await;

        store.init(1).unwrap();
        let waiting = store.request(1).unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        store.init(2).unwrap();

        // Exactly one TTL idle is not enough
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.inner.expire_idle(Instant::now()).expired, 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let sweep = store.inner.expire_idle(Instant::now());
        assert_eq!(sweep.expired, 1);
        assert_eq!(store.keys(), vec![2]);
        assert_eq!(store.rendezvous(2), Some(Rendezvous::Fresh));
        assert!(matches!(waiting.await, Err(SlotError::Expired { key: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_exits_when_store_dropped() {
        let store = store_with_ttl(1);
        let weak = std::sync::Arc::downgrade(&store.inner);
        store.init(1).unwrap();

        // Let the sweeper run a pass, then drop the only handle
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(store);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(weak.upgrade().is_none());
    }
}
