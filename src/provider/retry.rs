use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::warn;

use crate::error::AdapterError;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^(n-1)` after the n-th failed attempt.
    #[default]
    Exponential,
    /// Always `base`.
    Fixed,
}

/// Attempt budget and backoff shared by every adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    /// Ceiling applied to computed delays and to vendor `Retry-After` hints.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, handy for tests and embedders with their own pacing.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use llm_switchboard::provider::retry::RetryPolicy;
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    /// assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    /// assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Only the numeric form is understood; HTTP-date values are ignored.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps a non-2xx status onto the adapter error taxonomy.
pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    message: String,
    retry_after: Option<Duration>,
) -> AdapterError {
    match status {
        401 | 403 => AdapterError::auth(provider, message),
        429 => AdapterError::rate_limited(provider, message).with_retry_after(retry_after),
        408 | 504 => AdapterError::timeout(provider, message).with_retry_after(retry_after),
        400 | 404 | 413 | 422 => AdapterError::invalid_request(provider, message),
        500..=599 => AdapterError::vendor(provider, message)
            .with_retriable(true)
            .with_retry_after(retry_after),
        _ => AdapterError::vendor(provider, format!("unexpected status {status}: {message}")),
    }
}

/// Runs `op` until it succeeds, fails permanently or the attempt budget is spent.
///
/// When `deadline` is set, every attempt and backoff sleep is bounded by it and an
/// expired deadline surfaces as a non-retriable [`Timeout`](crate::error::AdapterErrorKind::Timeout).
/// Errors returned from here always have `retriable == false`.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    deadline: Option<Instant>,
    op: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let Some(deadline) = deadline else {
        return run_attempts(policy, provider, op).await;
    };
    if deadline <= Instant::now() {
        return Err(deadline_exceeded(provider));
    }
    match timeout_at(deadline, run_attempts(policy, provider, op)).await {
        Ok(result) => result,
        Err(_) => Err(deadline_exceeded(provider)),
    }
}

fn deadline_exceeded(provider: &str) -> AdapterError {
    AdapterError::timeout(provider, "deadline exceeded").exhausted()
}

async fn run_attempts<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    mut op: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.retriable && attempt < max_attempts => {
                let delay = err
                    .retry_after
                    .map(|hint| hint.min(policy.max_delay))
                    .unwrap_or_else(|| policy.delay_for(attempt));
                warn!(
                    provider,
                    attempt,
                    max_attempts,
                    kind = %err.kind,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure: {}",
                    err.message
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.exhausted()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::AdapterErrorKind;

    #[test]
    fn classify_status_follows_taxonomy() {
        let cases = [
            (401, AdapterErrorKind::Auth, false),
            (403, AdapterErrorKind::Auth, false),
            (429, AdapterErrorKind::RateLimited, true),
            (408, AdapterErrorKind::Timeout, true),
            (504, AdapterErrorKind::Timeout, true),
            (400, AdapterErrorKind::InvalidRequest, false),
            (404, AdapterErrorKind::InvalidRequest, false),
            (422, AdapterErrorKind::InvalidRequest, false),
            (500, AdapterErrorKind::Vendor, true),
            (503, AdapterErrorKind::Vendor, true),
            (302, AdapterErrorKind::Vendor, false),
        ];
        for (status, kind, retriable) in cases {
            let err = classify_status("openai", status, "boom".into(), None);
            assert_eq!(err.kind, kind, "status {status}");
            assert_eq!(err.retriable, retriable, "status {status}");
        }
    }

    #[test]
    fn retry_after_header_is_case_insensitive() {
        let headers = HashMap::from([("Retry-After".to_string(), " 7 ".to_string())]);
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(7))
        );
        let headers = HashMap::from([(
            "retry-after".to_string(),
            "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        )]);
        assert_eq!(retry_after_from_headers(&headers), None);
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let policy = RetryPolicy {
            backoff: BackoffStrategy::Fixed,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), policy.delay_for(5));
    }

    #[tokio::test]
    async fn transient_failures_consume_the_whole_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = execute(&RetryPolicy::immediate(3), "groq", None, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::timeout("groq", "read timed out"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert!(!err.retriable);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = execute(&RetryPolicy::immediate(5), "openai", None, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::auth("openai", "invalid api key"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, AdapterErrorKind::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = execute(&RetryPolicy::immediate(3), "mistral", None, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AdapterError::vendor("mistral", "bad gateway").with_retriable(true))
                } else {
                    Ok("hello")
                }
            }
        })
        .await
        .expect("second attempt succeeds");

        assert_eq!(value, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_replaces_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let _ = execute(&policy, "anthropic", None, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AdapterError::rate_limited("anthropic", "slow down")
                        .with_retry_after(Some(Duration::from_secs(4))))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn expired_deadline_fails_without_calling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let past = Instant::now() - Duration::from_millis(1);
        let result = execute(&RetryPolicy::default(), "cohere", Some(past), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("unreachable")
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert!(!err.retriable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_backoff_sleeps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        let result: Result<(), _> = execute(&policy, "together", Some(deadline), || async {
            Err(AdapterError::vendor("together", "overloaded").with_retriable(true))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert_eq!(err.message, "deadline exceeded");
    }
}
