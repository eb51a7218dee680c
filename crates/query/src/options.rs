use std::time::Duration;

/// Exponential back-off between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failure; `0` disables retrying
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(30) }
    }
}
impl RetryPolicy {
    pub fn none() -> Self {
        Self { attempts: 0, ..Self::default() }
    }

    /// Wait before the retry that follows failure number `failures` (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent).min(self.max_delay)
    }
}

/// Per-query behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Disabled queries never fetch on their own
    pub enabled: bool,
    /// How long fetched data counts as fresh
    pub stale_time: Duration,
    /// How long an entry without subscribers is kept
    pub gc_time: Duration,
    pub retry: RetryPolicy,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
}
impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            refetch_on_focus: true,
            refetch_on_reconnect: true,
        }
    }
}
impl QueryOptions {
    /// Defaults for identity-sensitive lookups: a failure is final.
    pub fn identity() -> Self {
        Self::default().without_retry()
    }

    pub fn without_retry(mut self) -> Self {
        self.retry = RetryPolicy::none();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
