use std::fmt;

use crate::Key;

/// Why an entry left the store without completing its rendezvous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Idle for longer than the TTL
    Expired,
    /// Failed by `dispose` while a consumer was waiting
    Disposed,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Disposed => "disposed",
        })
    }
}

/// Collaborator notified once per evicted key.
///
/// Called after the store lock has been released, so implementations may call
/// back into the store.
pub trait EvictionListener: Send + Sync {
    fn on_evicted(&self, key: Key, reason: EvictionReason);
}

impl<F> EvictionListener for F
where
    F: Fn(Key, EvictionReason) + Send + Sync,
{
    fn on_evicted(&self, key: Key, reason: EvictionReason) {
        self(key, reason)
    }
}

/// Default listener: one `tracing` event per evicted key
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl EvictionListener for TracingListener {
    fn on_evicted(&self, key: Key, reason: EvictionReason) {
        tracing::info!(key, %reason, "entry evicted");
    }
}
