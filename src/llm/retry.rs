//! Bounded retry schedule for inference calls
//!
//! The schedule is a small state machine: each attempt is started with
//! [`RetryState::begin_attempt`], and every failure is fed to
//! [`RetryState::on_failure`], which either names the backoff before the next
//! attempt or ends the sequence.

use super::error::CallError;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// First backoff after a transient failure, doubled each retry
    pub base_delay: Duration,
    /// First backoff after a 429, doubled each retry
    pub rate_limit_base_delay: Duration,
    /// Upper bound of any single backoff (the per-call timeout)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            rate_limit_base_delay: DEFAULT_RATE_LIMIT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_delay,
            ..Default::default()
        }
    }

    /// Backoff after the `failed_attempt`-th attempt (1-based) failed with `error`
    pub fn backoff(&self, failed_attempt: u32, error: &CallError) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let factor = 1u32 << exponent;
        let delay = match error {
            CallError::RateLimited { retry_after } => {
                let scheduled = self.rate_limit_base_delay.saturating_mul(factor);
                let requested = retry_after.map(Duration::from_secs).unwrap_or_default();
                scheduled.max(requested)
            }
            _ => self.base_delay.saturating_mul(factor),
        };
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then issue another attempt
    Retry { delay: Duration },
    /// Stop; the last error is final
    GiveUp,
}

/// Attempt counter driven by a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Records the start of an attempt and returns its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn on_failure(&self, error: &CallError) -> RetryDecision {
        if !error.is_retryable() || self.is_exhausted() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.policy.backoff(self.attempts, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> CallError {
        CallError::transient("503")
    }

    fn run_schedule(error: &CallError) -> Vec<RetryDecision> {
        let mut state = RetryState::new(RetryPolicy::default());
        let mut decisions = Vec::new();
        loop {
            state.begin_attempt();
            let decision = state.on_failure(error);
            decisions.push(decision);
            if decision == RetryDecision::GiveUp {
                return decisions;
            }
        }
    }

    #[test]
    fn test_transient_schedule_doubles_from_one_second() {
        assert_eq!(
            run_schedule(&transient()),
            vec![
                RetryDecision::Retry {
                    delay: Duration::from_secs(1)
                },
                RetryDecision::Retry {
                    delay: Duration::from_secs(2)
                },
                RetryDecision::GiveUp,
            ]
        );
    }

    #[test]
    fn test_rate_limit_schedule_starts_at_two_seconds() {
        let error = CallError::RateLimited { retry_after: None };
        assert_eq!(
            run_schedule(&error),
            vec![
                RetryDecision::Retry {
                    delay: Duration::from_secs(2)
                },
                RetryDecision::Retry {
                    delay: Duration::from_secs(4)
                },
                RetryDecision::GiveUp,
            ]
        );
    }

    #[test]
    fn test_fatal_is_never_retried() {
        let mut state = RetryState::new(RetryPolicy::default());
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&CallError::fatal("bad request")),
            RetryDecision::GiveUp
        );
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_retry_after_extends_backoff() {
        let policy = RetryPolicy::default();
        let error = CallError::RateLimited {
            retry_after: Some(30),
        };
        assert_eq!(policy.backoff(1, &error), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_is_capped_by_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5));
        assert_eq!(policy.backoff(8, &transient()), Duration::from_secs(5));

        let error = CallError::RateLimited {
            retry_after: Some(3600),
        };
        assert_eq!(policy.backoff(1, &error), Duration::from_secs(5));
    }

    #[test]
    fn test_single_attempt_policy() {
        let mut state = RetryState::new(RetryPolicy::new(0, DEFAULT_MAX_DELAY));
        state.begin_attempt();
        assert!(state.is_exhausted());
        assert_eq!(state.on_failure(&transient()), RetryDecision::GiveUp);
    }
}
