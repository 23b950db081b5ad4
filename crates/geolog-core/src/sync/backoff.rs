//! Retry delays after failed reconciliation passes.

use std::time::Duration;

/// Capped exponential schedule: `base`, `2*base`, `4*base`, ... up to `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(5 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Delay after `failures` consecutive failures; zero when there were none.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Consecutive-failure counter over a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Count a failure and return how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn schedule_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..=10).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![0, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);
    }

    #[test]
    fn huge_failure_counts_stay_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        assert_eq!(backoff.record_failure(), Duration::from_secs(2));
        assert_eq!(backoff.record_failure(), Duration::from_secs(4));
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.record_failure(), Duration::from_secs(2));
    }
}
