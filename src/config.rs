//! Runtime configuration
//!
//! Use the builder-style setters to override the defaults:
//!
//! ```ignore
//! let config = RuntimeConfig::new()
//!     .with_deactivation_interval(Duration::from_secs(60))
//!     .with_request_timeout(Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Tunables for a runtime instance
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Idle time after which a live instance is reaped
    pub deactivation_interval: Duration,

    /// Default deadline for unary requests
    pub request_timeout: Duration,

    /// Ceiling for transport reconnect backoff
    pub reconnect_backoff_cap: Duration,

    /// How long broadcast discovery keeps collecting replies
    pub discovery_aggregate_timeout: Duration,

    /// Upper bound on collected broadcast discovery replies
    pub discovery_max_replies: usize,
}

impl RuntimeConfig {
    /// Configuration with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle interval after which instances are reaped
    pub fn with_deactivation_interval(mut self, interval: Duration) -> Self {
        self.deactivation_interval = interval;
        self
    }

    /// Set the default unary request deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the transport reconnect backoff ceiling
    pub fn with_reconnect_backoff_cap(mut self, cap: Duration) -> Self {
        self.reconnect_backoff_cap = cap;
        self
    }

    /// Set the broadcast discovery collection window
    pub fn with_discovery_aggregate_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_aggregate_timeout = timeout;
        self
    }

    /// Set the broadcast discovery reply cap
    pub fn with_discovery_max_replies(mut self, max: usize) -> Self {
        self.discovery_max_replies = max;
        self
    }

    /// How often the reaper scans the live table.
    ///
    /// A quarter of the deactivation interval, clamped so short test
    /// intervals still reap promptly and long ones do not spin.
    pub fn reaper_tick(&self) -> Duration {
        let tick = self.deactivation_interval / 4;
        tick.clamp(Duration::from_millis(10), Duration::from_secs(30))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            deactivation_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            reconnect_backoff_cap: Duration::from_secs(30),
            discovery_aggregate_timeout: Duration::from_secs(2),
            discovery_max_replies: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.deactivation_interval, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.discovery_max_replies, 64);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_deactivation_interval(Duration::from_millis(100))
            .with_request_timeout(Duration::from_millis(50))
            .with_discovery_max_replies(3);
        assert_eq!(config.deactivation_interval, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_millis(50));
        assert_eq!(config.discovery_max_replies, 3);
    }

    #[test]
    fn test_reaper_tick_clamped() {
        let fast = RuntimeConfig::new().with_deactivation_interval(Duration::from_millis(20));
        assert_eq!(fast.reaper_tick(), Duration::from_millis(10));

        let slow = RuntimeConfig::new().with_deactivation_interval(Duration::from_secs(3600));
        assert_eq!(slow.reaper_tick(), Duration::from_secs(30));
    }
}
