//! Hold engine tuning.

use std::time::Duration;

/// Explicit configuration for [`HoldManager`](crate::manager::HoldManager).
///
/// Passed in at construction; nothing is read from the environment.
#[derive(Debug, Clone)]
pub struct HoldConfig {
    /// Transaction-local bound on row-lock waits. Contention surfaces as a
    /// busy error after this long instead of queueing indefinitely.
    pub lock_timeout: Duration,
    /// Suggested delay carried on busy errors before the caller retries.
    pub retry_after: Duration,
    /// TTL applied when the caller does not supply one.
    pub default_ttl: Duration,
    /// Floor applied to caller-supplied TTLs.
    pub min_ttl: Duration,
    /// Expired holds opportunistically reclaimed inside each create
    /// transaction. Zero disables the inline reap.
    pub create_reap_limit: u32,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            retry_after: Duration::from_millis(750),
            default_ttl: Duration::from_secs(20 * 60),
            min_ttl: Duration::from_secs(30),
            create_reap_limit: 5,
        }
    }
}

impl HoldConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = delay;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_create_reap_limit(mut self, limit: u32) -> Self {
        self.create_reap_limit = limit;
        self
    }

    /// Resolve a caller-supplied TTL: default when absent, floored at
    /// [`HoldConfig::min_ttl`] otherwise.
    pub fn clamp_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.default_ttl).max(self.min_ttl)
    }
}
