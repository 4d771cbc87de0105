use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use super::backoff::BackoffPolicy;

/// How a failed attempt is treated by the [`RetryExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote side is throttling us. Retryable, raises the backoff level.
    RateLimited,
    /// The call did not answer in time. Retryable, keeps the backoff level.
    TimedOut,
    /// Anything else. Never retried.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::TimedOut)
    }
}

/// Error returned once the executor gives up on an operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u64,
        #[source]
        source: E,
    },

    /// The operation failed with an error that is not worth retrying.
    #[error("{0}")]
    Fatal(#[source] E),
}

impl<E> RetryError<E> {
    /// The error of the last attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Fatal(source) => source,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Per-call retry state, carried in every trace event of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// Correlates log lines across nested fan-out.
    pub call_id: String,
    /// Zero-based attempt index.
    pub attempt: u64,
    /// Number of rate-limit errors seen so far.
    pub backoff_level: u32,
}

impl RetryContext {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            attempt: 0,
            backoff_level: 0,
        }
    }
}

/// Runs a fallible async operation with retries and backoff.
///
/// `max_retries` counts attempts after the first one, so the operation is
/// called at most `max_retries + 1` times; a negative value retries forever.
/// The executor keeps no state between calls and can be shared freely
/// between concurrent tasks.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_retries: i64,
    backoff: BackoffPolicy,
}

impl RetryExecutor {
    pub fn new(max_retries: i64, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn max_retries(&self) -> i64 {
        self.max_retries
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Whether another attempt is allowed after the zero-based `attempt` failed.
    fn allows_retry(&self, attempt: u64) -> bool {
        self.max_retries < 0 || attempt < self.max_retries as u64
    }

    /// Call `operation` until it succeeds, fails fatally, or the retry budget
    /// runs out. `classify` decides what each error means for the loop.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        call_id: &str,
        mut operation: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        let mut ctx = RetryContext::new(call_id);

        loop {
            debug!(
                call_id = %ctx.call_id,
                attempt = ctx.attempt,
                max_retries = self.max_retries,
                backoff_level = ctx.backoff_level,
                "calling operation"
            );

            let delay = match operation().await {
                Ok(value) => {
                    debug!(call_id = %ctx.call_id, attempt = ctx.attempt, "call succeeded");
                    return Ok(value);
                }
                Err(error) => self.next_delay(&mut ctx, error, &classify)?,
            };

            debug!(
                call_id = %ctx.call_id,
                attempt = ctx.attempt,
                backoff_level = ctx.backoff_level,
                delay_ms = delay.as_millis() as u64,
                "sleeping before retry"
            );
            sleep(delay).await;
            ctx.attempt += 1;
        }
    }

    /// Decide what to do with a failed attempt: the delay before the next
    /// one, or the error to give up with.
    fn next_delay<E, C>(
        &self,
        ctx: &mut RetryContext,
        error: E,
        classify: &C,
    ) -> Result<Duration, RetryError<E>>
    where
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        let class = classify(&error);

        if !class.is_retryable() {
            debug!(call_id = %ctx.call_id, attempt = ctx.attempt, %error, "unretryable error");
            return Err(RetryError::Fatal(error));
        }

        if !self.allows_retry(ctx.attempt) {
            debug!(call_id = %ctx.call_id, attempt = ctx.attempt, %error, "retries exhausted");
            return Err(RetryError::Exhausted {
                attempts: ctx.attempt + 1,
                source: error,
            });
        }

        debug!(call_id = %ctx.call_id, attempt = ctx.attempt, ?class, %error, "retryable error");
        if class == ErrorClass::RateLimited {
            ctx.backoff_level += 1;
        }
        Ok(self.backoff.sample(ctx.backoff_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TestError {
        Rate,
        Timeout,
        Broken,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Rate => write!(f, "rate limited"),
                TestError::Timeout => write!(f, "timed out"),
                TestError::Broken => write!(f, "broken"),
            }
        }
    }

    fn classify(e: &TestError) -> ErrorClass {
        match e {
            TestError::Rate => ErrorClass::RateLimited,
            TestError::Timeout => ErrorClass::TimedOut,
            TestError::Broken => ErrorClass::Fatal,
        }
    }

    fn executor(max_retries: i64) -> RetryExecutor {
        RetryExecutor::new(max_retries, BackoffPolicy::immediate())
    }

    #[tokio::test]
    async fn first_success_calls_once() {
        let mut calls = 0;
        let result = executor(5)
            .execute(
                "t",
                || {
                    calls += 1;
                    async { Ok::<_, TestError>(42) }
                },
                classify,
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn all_retryable_failures_call_budget_plus_one() {
        for retries in [0, 1, 3] {
            let mut calls = 0;
            let result = executor(retries)
                .execute(
                    "t",
                    || {
                        calls += 1;
                        async { Err::<(), _>(TestError::Timeout) }
                    },
                    classify,
                )
                .await;
            let err = result.unwrap_err();
            assert!(err.is_exhausted());
            assert_eq!(calls, retries + 1);
            match err {
                RetryError::Exhausted { attempts, source } => {
                    assert_eq!(attempts, (retries + 1) as u64);
                    assert_eq!(source, TestError::Timeout);
                }
                other => panic!("expected exhausted, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn fatal_is_never_retried() {
        let mut calls = 0;
        let result = executor(10)
            .execute(
                "t",
                || {
                    calls += 1;
                    async { Err::<(), _>(TestError::Broken) }
                },
                classify,
            )
            .await;
        assert!(matches!(result, Err(RetryError::Fatal(TestError::Broken))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn fatal_after_retryable_stops_immediately() {
        let mut calls = 0;
        let result = executor(10)
            .execute(
                "t",
                || {
                    calls += 1;
                    let n = calls;
                    async move {
                        if n < 3 {
                            Err::<(), _>(TestError::Rate)
                        } else {
                            Err(TestError::Broken)
                        }
                    }
                },
                classify,
            )
            .await;
        assert!(matches!(result, Err(RetryError::Fatal(TestError::Broken))));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let mut calls = 0;
        let result = executor(2)
            .execute(
                "t",
                || {
                    calls += 1;
                    let n = calls;
                    async move {
                        if n < 3 {
                            Err(TestError::Timeout)
                        } else {
                            Ok("done")
                        }
                    }
                },
                classify,
            )
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn unbounded_retries_keep_going() {
        let mut calls = 0;
        let result = executor(-1)
            .execute(
                "t",
                || {
                    calls += 1;
                    let n = calls;
                    async move {
                        if n < 50 {
                            Err(TestError::Rate)
                        } else {
                            Ok(n)
                        }
                    }
                },
                classify,
            )
            .await;
        assert_eq!(result.unwrap(), 50);
    }

    #[test]
    fn backoff_level_moves_only_on_rate_limits() {
        let exec = executor(10);
        let mut ctx = RetryContext::new("t");

        exec.next_delay(&mut ctx, TestError::Timeout, &classify).unwrap();
        assert_eq!(ctx.backoff_level, 0);

        exec.next_delay(&mut ctx, TestError::Rate, &classify).unwrap();
        exec.next_delay(&mut ctx, TestError::Rate, &classify).unwrap();
        assert_eq!(ctx.backoff_level, 2);

        exec.next_delay(&mut ctx, TestError::Timeout, &classify).unwrap();
        assert_eq!(ctx.backoff_level, 2);
    }

    #[test]
    fn rate_limit_delay_grows() {
        let exec = RetryExecutor::new(
            10,
            BackoffPolicy {
                base_delay_ms: 100,
                jitter: false,
                ..Default::default()
            },
        );
        let mut ctx = RetryContext::new("t");
        let first = exec.next_delay(&mut ctx, TestError::Rate, &classify).unwrap();
        let second = exec.next_delay(&mut ctx, TestError::Rate, &classify).unwrap();
        let timeout = exec.next_delay(&mut ctx, TestError::Timeout, &classify).unwrap();
        assert_eq!(first, Duration::from_millis(200));
        assert_eq!(second, Duration::from_millis(400));
        assert_eq!(timeout, Duration::from_millis(400));
    }

    #[tokio::test]
    async fn executor_is_shareable_across_tasks() {
        let exec = Arc::new(executor(3));
        let calls = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let exec = exec.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let mut local = 0u64;
                exec.execute(
                    &format!("task {i}"),
                    || {
                        local += 1;
                        calls.fetch_add(1, Ordering::SeqCst);
                        let n = local;
                        async move {
                            if n < 2 {
                                Err(TestError::Timeout)
                            } else {
                                Ok(n)
                            }
                        }
                    },
                    classify,
                )
                .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn error_display() {
        let err: RetryError<TestError> = RetryError::Exhausted {
            attempts: 3,
            source: TestError::Timeout,
        };
        assert_eq!(err.to_string(), "retries exhausted after 3 attempt(s): timed out");
        let err: RetryError<TestError> = RetryError::Fatal(TestError::Broken);
        assert_eq!(err.to_string(), "broken");
    }
}
