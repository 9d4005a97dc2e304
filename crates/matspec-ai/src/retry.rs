//! Bounded retry around one completion request.
//!
//! Transient failures get a fixed number of retries after a fixed delay. Rate
//! limiting gets exponential backoff up to an attempt ceiling. Rejected and
//! authentication failures are returned at once.

use std::future::Future;
use std::time::Duration;

use matspec_core::config::RetrySettings;
use tracing::warn;

use crate::provider::CompletionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub transient_retries: u32,
    pub transient_delay: Duration,
    /// Total attempts allowed while the API keeps answering 429.
    pub rate_limit_attempts: u32,
    pub rate_limit_base: Duration,
    pub rate_limit_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            transient_retries: s.transient_retries,
            transient_delay: Duration::from_millis(s.transient_delay_ms),
            rate_limit_attempts: s.rate_limit_attempts.max(1),
            rate_limit_base: Duration::from_millis(s.rate_limit_base_ms),
            rate_limit_cap: Duration::from_millis(s.rate_limit_cap_ms),
        }
    }
}

impl RetryPolicy {
    /// Default attempt counts with every delay set to zero.
    pub fn immediate() -> Self {
        Self {
            transient_delay: Duration::ZERO,
            rate_limit_base: Duration::ZERO,
            rate_limit_cap: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Wait before retry `n` (1-based) after a 429.
    ///
    /// `base · 2^(n-1)` capped, or the server's `retry-after` when that is longer.
    pub fn backoff(&self, n: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(n.saturating_sub(1));
        let exponential = self
            .rate_limit_base
            .saturating_mul(factor)
            .min(self.rate_limit_cap);
        match retry_after {
            Some(server) if server > exponential => server,
            _ => exponential,
        }
    }
}

/// Final error of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub error: CompletionError,
    /// Requests made, including the first.
    pub attempts: u32,
}

/// Run `op` under `policy`, returning its value and the number of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CompletionError>>,
{
    let mut attempts = 0;
    let mut transient = 0;
    let mut rate_limited = 0;

    loop {
        attempts += 1;
        let error = match op().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => e,
        };

        let delay = match &error {
            CompletionError::Transient(message) if transient < policy.transient_retries => {
                transient += 1;
                warn!(label, attempt = attempts, error = %message, "transient failure, retrying");
                policy.transient_delay
            }
            CompletionError::RateLimited { retry_after }
                if rate_limited + 1 < policy.rate_limit_attempts =>
            {
                rate_limited += 1;
                let delay = policy.backoff(rate_limited, *retry_after);
                warn!(
                    label,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                delay
            }
            _ => return Err(RetryFailure { error, attempts }),
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays scripted results, then succeeds.
    async fn run(
        policy: &RetryPolicy,
        script: Vec<CompletionError>,
    ) -> (Result<(&'static str, u32), RetryFailure>, usize) {
        let script = Mutex::new(script.into_iter());
        let calls = Mutex::new(0usize);
        let result = with_retry(policy, "test", || {
            *calls.lock().unwrap() += 1;
            let next = script.lock().unwrap().next();
            async move {
                match next {
                    Some(e) => Err(e),
                    None => Ok("done"),
                }
            }
        })
        .await;
        let calls = *calls.lock().unwrap();
        (result, calls)
    }

    fn transient() -> CompletionError {
        CompletionError::Transient("connection reset".into())
    }

    fn limited() -> CompletionError {
        CompletionError::RateLimited { retry_after: None }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let policy = RetryPolicy::immediate();
        let (result, calls) = run(&policy, vec![transient()]).await;
        assert_eq!(result.unwrap(), ("done", 2));
        assert_eq!(calls, 2);

        let (result, calls) = run(&policy, vec![transient(), transient()]).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.error, transient());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn rate_limit_stops_at_attempt_ceiling() {
        let policy = RetryPolicy::immediate();
        let (result, _) = run(&policy, vec![limited(), limited(), limited()]).await;
        assert_eq!(result.unwrap().1, 4);

        let (result, calls) = run(&policy, vec![limited(); 5]).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 4);
        assert!(matches!(failure.error, CompletionError::RateLimited { .. }));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn rejected_and_auth_are_not_retried() {
        let policy = RetryPolicy::immediate();
        let rejected = CompletionError::Rejected {
            status: 400,
            message: "image too large".into(),
        };
        let (result, calls) = run(&policy, vec![rejected.clone()]).await;
        assert_eq!(result.unwrap_err().error, rejected);
        assert_eq!(calls, 1);

        let (result, calls) = run(&policy, vec![CompletionError::Auth("bad key".into())]).await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1, None), Duration::from_secs(2));
        assert_eq!(policy.backoff(2, None), Duration::from_secs(4));
        assert_eq!(policy.backoff(3, None), Duration::from_secs(8));
        assert_eq!(policy.backoff(5, None), Duration::from_secs(30));
        assert_eq!(policy.backoff(40, None), Duration::from_secs(30));
    }

    #[test]
    fn backoff_honours_longer_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(1, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.backoff(3, Some(Duration::from_secs(1))),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn policy_from_settings() {
        let settings = RetrySettings {
            transient_retries: 2,
            transient_delay_ms: 500,
            rate_limit_attempts: 0,
            rate_limit_base_ms: 100,
            rate_limit_cap_ms: 1000,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.transient_retries, 2);
        assert_eq!(policy.transient_delay, Duration::from_millis(500));
        assert_eq!(policy.rate_limit_attempts, 1);
    }
}
