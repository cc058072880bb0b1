use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::listener::{EvictionListener, TracingListener};

/// Default idle time before an entry is expired by the sweeper
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Smallest TTL the store accepts; shorter values are raised to this
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Environment variable read by [`StoreConfig::from_env`]
pub const TTL_ENV_VAR: &str = "RENDEZVOUS_TTL_SECONDS";

/// Configuration for an [`AsyncStore`](crate::AsyncStore)
///
/// # Example
///
/// ```rust
/// use rendezvous_core::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_ttl(Duration::from_secs(30));
/// assert_eq!(config.ttl, Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct StoreConfig {
    /// Maximum idle time of an entry before the sweeper expires it (default: 60 seconds)
    pub ttl: Duration,
    /// Receives one record per expired or disposed key (default: [`TracingListener`])
    pub listener: Arc<dyn EvictionListener>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            listener: Arc::new(TracingListener),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL in whole seconds
    ///
    /// A TTL of zero is raised to [`MIN_TTL`].
    pub fn with_ttl_seconds(self, seconds: u64) -> Self {
        self.with_ttl(Duration::from_secs(seconds))
    }

    /// Sets the TTL
    ///
    /// Entries that see no `init`, `deliver` or `request` activity for this long
    /// are failed with [`SlotError::Expired`](crate::SlotError::Expired) and removed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rendezvous_core::StoreConfig;
    /// use std::time::Duration;
    ///
    /// let config = StoreConfig::default()
    ///     .with_ttl(Duration::from_millis(250));
    /// assert_eq!(config.ttl, Duration::from_millis(250));
    /// ```
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = clamp_ttl(ttl);
        self
    }

    /// Sets the collaborator that is told about every expired or disposed key
    pub fn with_listener(mut self, listener: impl EvictionListener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Creates a configuration from environment variables.
    ///
    /// Reads:
    /// - `RENDEZVOUS_TTL_SECONDS` - TTL in seconds (defaults to 60)
    pub fn from_env() -> Self {
        Self::default().with_ttl_seconds(ttl_seconds_from(std::env::var(TTL_ENV_VAR).ok()))
    }
}

/// Raises `ttl` to [`MIN_TTL`]. Also applied when a store is built, since `ttl` is a
/// public field and may bypass [`StoreConfig::with_ttl`].
pub(crate) fn clamp_ttl(ttl: Duration) -> Duration {
    if ttl < MIN_TTL {
        tracing::warn!(?ttl, min = ?MIN_TTL, "TTL below minimum, clamping");
        MIN_TTL
    } else {
        ttl
    }
}

fn ttl_seconds_from(raw: Option<String>) -> u64 {
    let default = DEFAULT_TTL.as_secs();
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = TTL_ENV_VAR, value = %raw, "unparsable TTL, using default");
            default
        }),
    }
}
