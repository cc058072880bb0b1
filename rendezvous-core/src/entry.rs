use tokio::time::Instant;

use crate::error::StoreError;
use crate::slot::ResultSlot;
use crate::Key;

/// Which half of an entry's rendezvous has happened so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rendezvous {
    /// Neither a delivery nor a request yet
    Fresh,
    /// An observer was handed out; waiting for the producer
    AwaitingDelivery,
    /// A result was delivered; waiting for the consumer
    AwaitingRequest,
}

/// The two parties of a rendezvous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Delivery,
    Request,
}

/// What the store should do with an entry after a side has been recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    Keep,
    Erase,
}

/// A registered pending computation
pub(crate) struct Entry<T> {
    last_touch: Instant,
    rendezvous: Rendezvous,
    pub(crate) slot: ResultSlot<T>,
}

impl<T> Entry<T> {
    pub(crate) fn new(key: Key, now: Instant) -> Self {
        Self {
            last_touch: now,
            rendezvous: Rendezvous::Fresh,
            slot: ResultSlot::new(key),
        }
    }

    pub(crate) fn last_touch(&self) -> Instant {
        self.last_touch
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_touch = now;
    }

    pub(crate) fn rendezvous(&self) -> Rendezvous {
        self.rendezvous
    }

    /// Fails if `side` already happened for this entry. Checked before the slot is
    /// touched so that a rejected call leaves the entry as it was.
    pub(crate) fn check(&self, key: Key, side: Side) -> Result<(), StoreError> {
        match (self.rendezvous, side) {
            (Rendezvous::AwaitingRequest, Side::Delivery) => Err(StoreError::AlreadyDelivered(key)),
            (Rendezvous::AwaitingDelivery, Side::Request) => Err(StoreError::AlreadyRequested(key)),
            _ => Ok(()),
        }
    }

    /// Records that `side` happened. The first side moves the entry into the
    /// matching waiting state; the counterpart settles it.
    pub(crate) fn advance(&mut self, side: Side) -> Settle {
        match (self.rendezvous, side) {
            (Rendezvous::Fresh, Side::Delivery) => {
                self.rendezvous = Rendezvous::AwaitingRequest;
                Settle::Keep
            }
            (Rendezvous::Fresh, Side::Request) => {
                self.rendezvous = Rendezvous::AwaitingDelivery;
                Settle::Keep
            }
            (Rendezvous::AwaitingDelivery, Side::Delivery)
            | (Rendezvous::AwaitingRequest, Side::Request) => Settle::Erase,
            // Rejected by `check`; keep the entry untouched.
            (Rendezvous::AwaitingRequest, Side::Delivery)
            | (Rendezvous::AwaitingDelivery, Side::Request) => Settle::Keep,
        }
    }

    /// Whether the sweeper should reclaim this entry at `now`
    pub(crate) fn is_expired(&self, now: Instant, ttl: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_touch) > ttl
    }
}
