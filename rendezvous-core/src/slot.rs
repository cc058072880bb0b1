use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::SlotError;
use crate::Key;

/// What an observer eventually yields
pub type Outcome<T> = Result<T, SlotError>;

/// Single-assignment storage for one pending computation.
///
/// The sending half completes the slot at most once. The receiving half is handed
/// out once as an [`Observer`] and keeps the outcome after the slot itself is dropped.
pub(crate) struct ResultSlot<T> {
    key: Key,
    sender: Option<oneshot::Sender<Outcome<T>>>,
    receiver: Option<oneshot::Receiver<Outcome<T>>>,
}

impl<T> ResultSlot<T> {
    pub(crate) fn new(key: Key) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            key,
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.sender.is_none()
    }

    /// Completes the slot. First completion wins: returns `false` and drops
    /// `outcome` if the slot was already completed.
    pub(crate) fn complete(&mut self, outcome: Outcome<T>) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // A dropped observer just means nobody is listening any more.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Hands out the observer; `None` once it has been taken.
    pub(crate) fn observe(&mut self) -> Option<Observer<T>> {
        let key = self.key;
        self.receiver.take().map(|rx| Observer { key, rx })
    }
}

/// Exclusive handle to a slot's eventual outcome.
///
/// An `Observer` is a future: await it directly or through [`Observer::get`].
/// If the slot is dropped without being completed (the entry was erased, or the
/// store went away) the observer resolves to [`SlotError::Abandoned`].
#[must_use = "observers do nothing unless awaited or polled"]
pub struct Observer<T> {
    key: Key,
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Observer<T> {
    /// The key this observer was requested for
    pub fn key(&self) -> Key {
        self.key
    }

    /// Waits for the outcome.
    pub async fn get(self) -> Outcome<T> {
        self.await
    }

    /// Blocks the current thread until the outcome is available.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    /// Use [`Observer::get`] there instead.
    pub fn blocking_get(self) -> Outcome<T> {
        let key = self.key;
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(SlotError::Abandoned { key }))
    }

    /// Returns the outcome if the slot is already completed, otherwise hands the
    /// observer back.
    pub fn try_get(mut self) -> Result<Outcome<T>, Self> {
        match self.rx.try_recv() {
            Ok(outcome) => Ok(outcome),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Closed) => Ok(Err(SlotError::Abandoned { key: self.key })),
        }
    }

    /// Turns this observer into one that any number of readers can clone and await.
    pub fn shared(self) -> SharedObserver<T>
    where
        T: Clone,
    {
        SharedObserver {
            key: self.key,
            inner: FutureExt::shared(self),
        }
    }
}

impl<T> Future for Observer<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let key = self.key;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(SlotError::Abandoned { key })))
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle to a slot's outcome; every clone replays the same value or error.
#[derive(Clone)]
pub struct SharedObserver<T: Clone> {
    key: Key,
    inner: Shared<Observer<T>>,
}

impl<T: Clone> SharedObserver<T> {
    pub fn key(&self) -> Key {
        self.key
    }

    /// Waits for the outcome. Can be called any number of times, from any clone.
    pub async fn get(&self) -> Outcome<T> {
        self.inner.clone().await
    }

    /// Blocks the current thread until the outcome is available.
    ///
    /// Must not be called from within an asynchronous execution context.
    pub fn blocking_get(&self) -> Outcome<T> {
        futures::executor::block_on(self.inner.clone())
    }

    /// Returns the outcome if the slot is already completed.
    pub fn try_get(&self) -> Option<Outcome<T>> {
        self.inner.clone().now_or_never()
    }
}

impl<T: Clone> fmt::Debug for SharedObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedObserver")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
