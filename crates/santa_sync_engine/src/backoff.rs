//! Retry delay after failed sessions.

use std::time::Duration;

/// How the delay after a failed session grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffPolicy {
    /// Always wait the configured interval.
    #[default]
    Constant,
    /// Double the interval for each consecutive failure, up to `max`.
    Exponential {
        /// Upper bound on the delay.
        max: Duration,
    },
}

impl BackoffPolicy {
    /// Delay before the next attempt after `consecutive_failures` failures
    /// in a row (1 for the first failure).
    pub fn delay(&self, base: Duration, consecutive_failures: u32) -> Duration {
        match self {
            BackoffPolicy::Constant => base,
            BackoffPolicy::Exponential { max } => {
                let shift = consecutive_failures.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min((*max).max(base))
            }
        }
    }
}

/// Consecutive-failure counter for the scheduler.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    policy: BackoffPolicy,
    consecutive_failures: u32,
}

impl Backoff {
    /// Creates a tracker using `policy`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn record_failure(&mut self, base: Duration) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.policy.delay(base, self.consecutive_failures)
    }

    /// Clears the failure streak.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(300);

    #[test]
    fn constant_policy_holds_interval() {
        let mut backoff = Backoff::new(BackoffPolicy::Constant);
        for _ in 0..5 {
            assert_eq!(backoff.record_failure(BASE), BASE);
        }
        assert_eq!(backoff.consecutive_failures(), 5);
    }

    #[test]
    fn exponential_policy_doubles_up_to_cap() {
        let mut backoff = Backoff::new(BackoffPolicy::Exponential {
            max: Duration::from_secs(1000),
        });
        assert_eq!(backoff.record_failure(BASE), Duration::from_secs(300));
        assert_eq!(backoff.record_failure(BASE), Duration::from_secs(600));
        assert_eq!(backoff.record_failure(BASE), Duration::from_secs(1000));
        assert_eq!(backoff.record_failure(BASE), Duration::from_secs(1000));

        backoff.record_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.record_failure(BASE), BASE);
    }

    #[test]
    fn cap_below_base_keeps_base() {
        let policy = BackoffPolicy::Exponential {
            max: Duration::from_secs(10),
        };
        assert_eq!(policy.delay(BASE, 3), BASE);
    }
}
