//! Per-entity exponential backoff state.
//!
//! One `Backoff` is kept per job id. Every recorded failure (`attempt`) grows
//! the delay; the owner consults `delay` before redispatching and drops the
//! state only after a successful completion.

use std::time::Duration;

/// Configuration shared by all backoff states of one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first recorded failure.
    pub base: Duration,
    /// Cap on the delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Record one failure.
    pub fn attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait after the most recent dispatch: zero before any failure,
    /// then `base * 2^(attempts - 1)` capped at `max`.
    pub fn delay(&self) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (self.attempts - 1).min(31);
        self.config
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.config.max)
            .min(self.config.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn no_delay_before_first_failure() {
        assert_eq!(Backoff::new(cfg()).delay(), Duration::ZERO);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let mut b = Backoff::new(cfg());
        b.attempt();
        assert_eq!(b.delay(), Duration::from_millis(100));
        b.attempt();
        assert_eq!(b.delay(), Duration::from_millis(200));
        b.attempt();
        assert_eq!(b.delay(), Duration::from_millis(400));
    }

    #[test]
    fn delay_capped_at_max() {
        let mut b = Backoff::new(cfg());
        for _ in 0..50 {
            b.attempt();
        }
        assert_eq!(b.delay(), Duration::from_millis(1_000));
        assert_eq!(b.attempts(), 50);
    }

    #[test]
    fn delay_is_monotonic() {
        let mut b = Backoff::new(cfg());
        let mut last = b.delay();
        for _ in 0..10 {
            b.attempt();
            assert!(b.delay() >= last);
            last = b.delay();
        }
    }
}
