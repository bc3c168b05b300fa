//! RetryController - turns a handler failure into a retry or a final failure

use std::time::Duration;

use tracing::debug;

use crate::domain::JobError;

use super::policy::RetryPolicy;

/// Outcome of classifying a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after `delay`; `retry_count` is the job's new count
    Retry { retry_count: u32, delay: Duration },
    /// Transition to failed
    Fail,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Applies a [`RetryPolicy`] to failed attempts
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        debug!(?policy, "RetryController::new: called");
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what happens after `error` on a job that has used `retry_count`
    /// of its `max_retries`
    pub fn decide(&self, retry_count: u32, max_retries: u32, error: &JobError) -> RetryDecision {
        let kind = error.kind();
        let cap = self.policy.cap_for(kind, max_retries);
        debug!(%kind, retry_count, max_retries, cap, "RetryController::decide: called");

        if !kind.is_retryable() || retry_count >= cap {
            debug!(%kind, "RetryController::decide: fail");
            return RetryDecision::Fail;
        }

        let retry_count = retry_count + 1;
        let mut delay = self.policy.delay_for(retry_count);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint.min(self.policy.max_delay()));
        }
        debug!(%kind, retry_count, ?delay, "RetryController::decide: retry");
        RetryDecision::Retry { retry_count, delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RetryController {
        RetryController::new(RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_transient_errors_retry_until_budget() {
        let controller = controller();
        let err = JobError::Timeout(Duration::from_secs(1));

        assert_eq!(
            controller.decide(0, 3, &err),
            RetryDecision::Retry {
                retry_count: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            controller.decide(2, 3, &err),
            RetryDecision::Retry {
                retry_count: 3,
                delay: Duration::from_millis(4000)
            }
        );
        assert_eq!(controller.decide(3, 3, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_validation_never_retries() {
        let controller = controller();
        let err = JobError::Validation("bad payload".to_string());
        assert_eq!(controller.decide(0, 10, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_cancelled_never_retries() {
        assert_eq!(controller().decide(0, 3, &JobError::Cancelled), RetryDecision::Fail);
    }

    #[test]
    fn test_unknown_is_capped() {
        let controller = controller();
        let err = JobError::unknown("boom");
        assert!(controller.decide(0, 5, &err).is_retry());
        assert_eq!(controller.decide(1, 5, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_zero_budget_fails_immediately() {
        let err = JobError::Network("reset".to_string());
        assert_eq!(controller().decide(0, 0, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_rate_limit_hint_extends_delay() {
        let controller = controller();
        let err = JobError::RateLimited {
            endpoint: "analysis".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        match controller.decide(0, 3, &err) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(30)),
            RetryDecision::Fail => panic!("expected retry"),
        }

        let short = JobError::RateLimited {
            endpoint: "analysis".to_string(),
            retry_after: Some(Duration::from_millis(10)),
        };
        match controller.decide(0, 3, &short) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_millis(1000)),
            RetryDecision::Fail => panic!("expected retry"),
        }
    }

    #[test]
    fn test_rate_limit_hint_capped_at_max_delay() {
        let err = JobError::RateLimited {
            endpoint: "analysis".to_string(),
            retry_after: Some(Duration::MAX),
        };
        match controller().decide(0, 3, &err) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(60)),
            RetryDecision::Fail => panic!("expected retry"),
        }
    }

    #[test]
    fn test_retry_count_never_exceeds_max() {
        let controller = controller();
        let err = JobError::Network("reset".to_string());
        let mut retry_count = 0;
        while let RetryDecision::Retry { retry_count: next, .. } = controller.decide(retry_count, 4, &err) {
            retry_count = next;
            assert!(retry_count <= 4);
        }
        assert_eq!(retry_count, 4);
    }
}
