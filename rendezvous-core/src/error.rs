//! Error types for the rendezvous store.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::Key;

/// Errors returned synchronously by store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key was never registered, or its entry is already gone
    #[error("unknown key {0}")]
    UnknownKey(Key),

    /// `init` was called for a key that is still live
    #[error("key {0} is already registered")]
    DuplicateKey(Key),

    /// A result was already delivered for this key
    #[error("result for key {0} was already delivered")]
    AlreadyDelivered(Key),

    /// An observer was already handed out for this key
    #[error("result for key {0} was already requested")]
    AlreadyRequested(Key),
}

impl StoreError {
    /// Returns `true` if this error means the key is not (or no longer) in the store.
    pub fn is_unknown_key(&self) -> bool {
        matches!(self, StoreError::UnknownKey(_))
    }
}

/// Failures observed through a result slot
#[derive(Error, Debug, Clone)]
pub enum SlotError {
    /// The entry sat idle longer than the TTL and was reclaimed by the sweeper
    #[error("entry {key} expired")]
    Expired { key: Key },

    /// The store was disposed while a consumer waited for this entry
    #[error("store disposed while entry {key} was awaiting delivery")]
    Disposed { key: Key },

    /// The slot was dropped without ever being completed
    #[error("entry {key} was dropped before a result was delivered")]
    Abandoned { key: Key },

    /// The producer delivered a failure
    #[error("producer failed: {0}")]
    Failed(DomainFailure),
}

impl SlotError {
    pub fn is_expired(&self) -> bool {
        matches!(self, SlotError::Expired { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, SlotError::Disposed { .. })
    }

    /// Returns the producer's failure, if this is one.
    pub fn domain_failure(&self) -> Option<&DomainFailure> {
        match self {
            SlotError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<DomainFailure> for SlotError {
    fn from(failure: DomainFailure) -> Self {
        SlotError::Failed(failure)
    }
}

/// A producer-supplied failure, shared verbatim with every observer of the slot.
#[derive(Clone)]
pub struct DomainFailure(Arc<dyn StdError + Send + Sync>);

impl DomainFailure {
    /// Wraps any error (or message) supplied by the producer.
    ///
    /// ```rust
    /// use rendezvous_core::DomainFailure;
    ///
    /// let failure = DomainFailure::new("upstream timed out");
    /// assert_eq!(failure.to_string(), "upstream timed out");
    /// ```
    pub fn new(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self(Arc::from(error.into()))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for DomainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for DomainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for DomainFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("quota exhausted for tenant {tenant}")]
    struct QuotaExhausted {
        tenant: u32,
    }

    #[test]
    fn test_store_error_messages() {
        assert_eq!(StoreError::UnknownKey(999).to_string(), "unknown key 999");
        assert_eq!(
            StoreError::AlreadyDelivered(3).to_string(),
            "result for key 3 was already delivered"
        );
        assert!(StoreError::UnknownKey(1).is_unknown_key());
        assert!(!StoreError::DuplicateKey(1).is_unknown_key());
    }

    #[test]
    fn test_domain_failure_keeps_concrete_error() {
        let failure = DomainFailure::new(QuotaExhausted { tenant: 7 });
        let err = SlotError::from(failure);

        assert_eq!(err.to_string(), "producer failed: quota exhausted for tenant 7");
        let inner = err
            .domain_failure()
            .and_then(|f| f.downcast_ref::<QuotaExhausted>())
            .expect("concrete error should be recoverable");
        assert_eq!(inner.tenant, 7);
    }

    #[test]
    fn test_slot_error_clone_shares_failure() {
        let err = SlotError::Failed(DomainFailure::new("boom"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert!(!copy.is_expired());
        assert!(SlotError::Expired { key: 1 }.is_expired());
        assert!(SlotError::Disposed { key: 1 }.is_disposed());
    }
}
