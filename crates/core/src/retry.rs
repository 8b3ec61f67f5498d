//! Bounded retry of model calls that hit upstream rate limits.

use std::time::Duration;

use aligner_model::{ErrorKind, ModelProviderError};
use backoff::backoff::Constant;

/// How often, and how long, to wait out rate-limit failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// How long to wait when the backend doesn't suggest a duration.
    pub default_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[inline]
    pub fn new(max_attempts: u32, default_delay: Duration) -> Self {
        Self {
            max_attempts,
            default_delay,
        }
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_delay: Duration::from_secs(60),
        }
    }
}

/// What a failed attempt means for the retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// A transient quota failure, with the backend's suggested wait.
    RateLimited(Option<Duration>),
    /// Anything else. Never retried.
    Fatal,
}

/// Errors that can tell whether they are worth retrying.
pub trait Classify {
    /// Classifies this error.
    fn classify(&self) -> Failure;
}

impl Classify for ErrorKind {
    #[inline]
    fn classify(&self) -> Failure {
        match *self {
            ErrorKind::RateLimitExceeded { retry_after } => {
                Failure::RateLimited(retry_after)
            }
            ErrorKind::Moderated | ErrorKind::Other => Failure::Fatal,
        }
    }
}

impl Classify for Box<dyn ModelProviderError> {
    #[inline]
    fn classify(&self) -> Failure {
        self.kind().classify()
    }
}

/// Repeats an operation while it fails with rate-limit errors.
///
/// A rate-limited attempt is followed by a wait of the suggested duration
/// plus one second, or [`RetryPolicy::default_delay`] when there is no
/// suggestion. The wait is a timer, so other tasks keep running. Any other
/// failure is returned immediately, and the last rate-limit failure is
/// returned once `max_attempts` attempts have been made.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
}

impl RetryingInvoker {
    /// Creates an invoker with the given policy.
    #[inline]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy of this invoker.
    #[inline]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds or gives up.
    #[inline]
    pub async fn invoke<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.invoke_notify(operation, |_: &E, _| {}).await
    }

    /// Like [`RetryingInvoker::invoke`], but calls `notify` with the error
    /// and the wait before every retry.
    pub async fn invoke_notify<T, E, F, Fut, N>(
        &self,
        mut operation: F,
        mut notify: N,
    ) -> Result<T, E>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(&E, Duration),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let default_delay = self.policy.default_delay;
        let mut attempt = 0;

        let attempt_once = || {
            attempt += 1;
            let this_attempt = attempt;
            let fut = operation();
            async move {
                let err = match fut.await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };
                match err.classify() {
                    Failure::RateLimited(retry_after)
                        if this_attempt < max_attempts =>
                    {
                        let delay = retry_after
                            .map(|d| d + Duration::from_secs(1))
                            .unwrap_or(default_delay);
                        Err(backoff::Error::retry_after(err, delay))
                    }
                    Failure::RateLimited(_) => {
                        warn!("rate limited, giving up after {this_attempt} attempts");
                        Err(backoff::Error::permanent(err))
                    }
                    Failure::Fatal => Err(backoff::Error::permanent(err)),
                }
            }
        };

        // Every transient error carries its own delay, so the backoff
        // itself is only a fallback.
        backoff::future::retry_notify(
            Constant::new(default_delay),
            attempt_once,
            |err: E, delay: Duration| {
                warn!("rate limited, waiting {}s before retrying", delay.as_secs());
                notify(&err, delay);
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::time::Instant;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        RateLimited(Option<u64>),
        Broken,
    }

    impl Classify for TestError {
        fn classify(&self) -> Failure {
            match self {
                TestError::RateLimited(secs) => {
                    Failure::RateLimited(secs.map(Duration::from_secs))
                }
                TestError::Broken => Failure::Fatal,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_retry_after_plus_one() {
        let invoker = RetryingInvoker::new(RetryPolicy::new(
            3,
            Duration::from_secs(60),
        ));
        let calls = Cell::new(0);
        let mut delays = vec![];
        let start = Instant::now();

        let result = invoker
            .invoke_notify(
                || {
                    calls.set(calls.get() + 1);
                    let n = calls.get();
                    async move {
                        if n <= 2 {
                            Err(TestError::RateLimited(Some(2)))
                        } else {
                            Ok("Budapest")
                        }
                    }
                },
                |_, delay| delays.push(delay),
            )
            .await;

        assert_eq!(result, Ok("Budapest"));
        assert_eq!(calls.get(), 3);
        assert_eq!(delays, [Duration::from_secs(3), Duration::from_secs(3)]);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let invoker = RetryingInvoker::new(RetryPolicy::new(
            5,
            Duration::from_secs(10),
        ));
        let calls = Cell::new(0);
        let start = Instant::now();

        let result: Result<(), _> = invoker
            .invoke(|| {
                calls.set(calls.get() + 1);
                async { Err(TestError::RateLimited(None)) }
            })
            .await;

        assert_eq!(result, Err(TestError::RateLimited(None)));
        assert_eq!(calls.get(), 5);
        // Four waits of the default delay between five attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let invoker = RetryingInvoker::default();
        let calls = Cell::new(0);

        let result: Result<(), _> = invoker
            .invoke(|| {
                calls.set(calls.get() + 1);
                async { Err(TestError::Broken) }
            })
            .await;

        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let invoker =
            RetryingInvoker::new(RetryPolicy::new(0, Duration::from_secs(1)));
        let calls = Cell::new(0);

        let result: Result<(), _> = invoker
            .invoke(|| {
                calls.set(calls.get() + 1);
                async { Err(TestError::RateLimited(Some(0))) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_classify_error_kind() {
        assert_eq!(
            ErrorKind::RateLimitExceeded {
                retry_after: Some(Duration::from_secs(2))
            }
            .classify(),
            Failure::RateLimited(Some(Duration::from_secs(2)))
        );
        assert_eq!(ErrorKind::Other.classify(), Failure::Fatal);
        assert_eq!(ErrorKind::Moderated.classify(), Failure::Fatal);
    }
}
