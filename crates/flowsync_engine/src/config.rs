//! Configuration for the sync engine.

use std::time::Duration;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "flowsync_engine_state";

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Key the engine snapshot is stored under.
    pub storage_key: String,
    /// Connectivity assumed at startup, before the first platform signal.
    pub initially_online: bool,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// How often the network monitor re-checks connectivity.
    pub connectivity_poll_interval: Duration,
    /// How often the background scheduler attempts a sync pass.
    pub sync_interval: Duration,
}

impl EngineConfig {
    /// Creates a configuration storing its snapshot under `storage_key`.
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            initially_online: true,
            retry: RetryConfig::default(),
            connectivity_poll_interval: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
        }
    }

    /// Sets the connectivity assumed at startup.
    pub fn with_initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the connectivity poll interval.
    pub fn with_connectivity_poll_interval(mut self, interval: Duration) -> Self {
        self.connectivity_poll_interval = interval;
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_KEY)
    }
}

/// Configuration for retry behavior.
///
/// The `n`-th failed submission (1-based) waits
/// `base_delay * backoff_multiplier^(n-1)` before the operation becomes
/// pending again. Once `max_attempts` submissions have failed the operation
/// is parked.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed submissions before an operation is parked.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: u32,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(2),
            backoff_multiplier: 2,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Creates a configuration that parks on the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay after the `retry_count`-th failure.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let factor = self
            .backoff_multiplier
            .checked_pow(retry_count - 1)
            .unwrap_or(u32::MAX);

        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns true if an operation with `retry_count` failures should be parked.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("planner")
            .with_initially_online(false)
            .with_sync_interval(Duration::from_secs(60))
            .with_connectivity_poll_interval(Duration::from_secs(5));

        assert_eq!(config.storage_key, "planner");
        assert!(!config.initially_online);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.connectivity_poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.connectivity_poll_interval, Duration::from_secs(10));
        assert_eq!(config.sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn backoff_doubles_from_two_seconds() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(40)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(39), Duration::from_secs(5));
    }

    #[test]
    fn exhaustion() {
        let config = RetryConfig::default();
        assert!(!config.exhausted(2));
        assert!(config.exhausted(3));
        assert!(RetryConfig::no_retry().exhausted(1));
    }
}
