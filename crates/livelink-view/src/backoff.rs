//! Reconnect backoff for views whose join failed

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Consecutive join failures of one view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectBackoff {
    consecutive_failures: u32,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a successful join, resetting the failure counter.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failed join; returns the new failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// True once more failures than `max_attempts` have been recorded
    pub fn is_exhausted(&self, config: &ReconnectConfig) -> bool {
        self.consecutive_failures > config.max_attempts
    }

    /// Jittered delay before the next attempt
    pub fn delay(&self, config: &ReconnectConfig) -> Duration {
        if self.is_exhausted(config) {
            return config.failsafe_jitter;
        }
        let min = config.min_jitter.as_millis() as u64;
        let max = (config.max_jitter.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_jitter() {
        let config = ReconnectConfig::default();
        let mut backoff = ReconnectBackoff::new();
        backoff.record_failure();
        for _ in 0..50 {
            let delay = backoff.delay(&config);
            assert!(delay >= config.min_jitter && delay <= config.max_jitter);
        }
    }

    #[test]
    fn test_failsafe_after_max_attempts() {
        let config = ReconnectConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..3 {
            backoff.record_failure();
        }
        assert!(backoff.is_exhausted(&config));
        assert_eq!(backoff.delay(&config), config.failsafe_jitter);

        backoff.record_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert!(!backoff.is_exhausted(&config));
    }
}
