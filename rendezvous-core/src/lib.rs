//! # Rendezvous Core
//!
//! A keyed asynchronous result store: register a pending computation under a key,
//! let a producer deliver its result and a consumer collect it, in either order.
//!
//! ## Features
//!
//! - One lock guards all bookkeeping; waiting for results happens outside of it
//! - Entries are removed as soon as both the delivery and the request happened
//! - Background sweeper task fails and removes entries idle longer than the TTL
//! - `dispose` releases every waiting consumer with an error and empties the store
//! - Exclusive ([`Observer`]) and cloneable ([`SharedObserver`]) result handles
//!
//! ## Example
//!
//! ```rust,no_run
//! use rendezvous_core::{AsyncStore, SlotError, StoreConfig};
//!
//! #[derive(Debug, Clone)]
//! enum Payload {
//!     Text(String),
//!     Count(u64),
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Entries idle for 30 seconds are expired
//!     let store = AsyncStore::with_config(StoreConfig::default().with_ttl_seconds(30));
//!
//!     store.init(10)?;
//!     store.init(12)?;
//!
//!     // Producer first, consumer second
//!     store.deliver(10, Payload::Text("hello".into()))?;
//!     let text = store.request(10)?.await?;
//!
//!     // Consumer first, producer from another task
//!     let pending = store.request(12)?;
//!     let producer = store.clone();
//!     tokio::spawn(async move { producer.deliver(12, Payload::Count(1)) });
//!     let count = pending.await?;
//!
//!     println!("{text:?} {count:?}");
//!     assert!(store.is_empty());
//!
//!     // Failures reach the consumer through the observer
//!     store.init(13)?;
//!     let observer = store.request(13)?;
//!     store.deliver_failure(13, "backend unavailable")?;
//!     assert!(matches!(observer.await, Err(SlotError::Failed(_))));
//!     Ok(())
//! }
//! ```

mod config;
mod entry;
mod error;
mod listener;
mod slot;
mod store;
mod sweeper;

/// Identifier of one pending computation. Uniqueness is up to the caller.
pub type Key = u64;

pub use config::{StoreConfig, DEFAULT_TTL, MIN_TTL, TTL_ENV_VAR};
pub use entry::Rendezvous;
pub use error::{DomainFailure, SlotError, StoreError};
pub use listener::{EvictionListener, EvictionReason, TracingListener};
pub use slot::{Observer, Outcome, SharedObserver};
pub use store::{AsyncStore, StoreStats};
