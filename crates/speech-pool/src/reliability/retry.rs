//! Retry policy and executor

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::duration_millis;

/// Classification of a failed attempt
///
/// Success is the `Ok` side of the surrounding `Result`; the executor only
/// looks at this tag to decide whether another attempt is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The same operation may succeed if simply tried again
    Transient(E),
    /// Retrying cannot help; abort remaining attempts
    Fatal(E),
}

impl<E> Failure<E> {
    /// Whether this failure may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Borrow the underlying error
    pub fn error(&self) -> &E {
        match self {
            Self::Transient(e) | Self::Fatal(e) => e,
        }
    }

    /// Drop the classification and keep the error
    pub fn into_inner(self) -> E {
        match self {
            Self::Transient(e) | Self::Fatal(e) => e,
        }
    }

    /// Convert the error while keeping the classification
    pub fn map<F, O>(self, f: F) -> Failure<O>
    where
        F: FnOnce(E) -> O,
    {
        match self {
            Self::Transient(e) => Failure::Transient(f(e)),
            Self::Fatal(e) => Failure::Fatal(f(e)),
        }
    }
}

impl<E: Display> Display for Failure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(e) => write!(f, "transient: {}", e),
            Self::Fatal(e) => write!(f, "fatal: {}", e),
        }
    }
}

/// How many times an operation is attempted and how long to wait in between
///
/// Delays are constant. The default policy retries immediately, leaving any
/// waiting to the I/O the operation itself performs.
///
/// # Example
///
/// ```
/// use chatvoice_speech::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial), at least 1
    pub max_attempts: u32,

    /// Delay before each retry
    #[serde(with = "duration_millis")]
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(3)
    }
}

impl RetryPolicy {
    /// Retry without any delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval: Duration::ZERO,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Create a policy with a fixed delay between attempts
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the delay between attempts
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Delay to wait before the given attempt number (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.interval
        }
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Runs an operation under a [`RetryPolicy`]
///
/// Attempts run one after another. A transient failure is retried while the
/// budget lasts and the last one is returned once it runs out; a fatal
/// failure is returned immediately. Executors hold no shared state, so each
/// call site can configure its own.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor for the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Shorthand for an immediate-retry executor
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(RetryPolicy::immediate(max_attempts))
    }

    /// The policy this executor applies
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds, fails fatally, or the budget is spent
    ///
    /// The closure receives the 1-based attempt number. The returned failure
    /// keeps its classification so executors can be nested.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, Failure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(Failure::Fatal(error)) => {
                    debug!(attempt, %error, "Fatal failure, not retrying");
                    return Err(Failure::Fatal(error));
                }
                Err(Failure::Transient(error)) => {
                    if !self.policy.has_attempts_remaining(attempt) {
                        debug!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            %error,
                            "Retry budget exhausted"
                        );
                        return Err(Failure::Transient(error));
                    }

                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        %error,
                        "Transient failure, retrying"
                    );

                    attempt += 1;
                    let delay = self.policy.delay_for_attempt(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails transiently `failures` times, then returns the attempt number
    fn flaky(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut(u32) -> std::future::Ready<Result<u32, Failure<String>>> {
        move |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            if attempt <= failures {
                std::future::ready(Err(Failure::Transient(format!("busy #{}", attempt))))
            } else {
                std::future::ready(Ok(attempt))
            }
        }
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.interval, Duration::ZERO);
    }

    #[test]
    fn test_policy_clamps_zero_attempts() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(2), 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
    }

    #[test]
    fn test_has_attempts_remaining() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1500), 5);
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("1500"));
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }

    #[tokio::test]
    async fn test_succeeds_after_two_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::with_max_attempts(3);

        let result = executor.execute(flaky(2, calls.clone())).await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::with_max_attempts(2);

        let result = executor.execute(flaky(2, calls.clone())).await;

        assert_eq!(result, Err(Failure::Transient("busy #2".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_attempts_after_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::with_max_attempts(5);

        let result = executor.execute(flaky(0, calls.clone())).await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::with_max_attempts(5);

        let counter = calls.clone();
        let result: Result<(), Failure<String>> = executor
            .execute(|_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::Fatal("broken".to_string())) }
            })
            .await;

        assert_eq!(result, Err(Failure::Fatal("broken".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_interval_waits_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::fixed(Duration::from_secs(1), 3));
        let started = tokio::time::Instant::now();

        let result = executor.execute(flaky(2, calls)).await;

        assert_eq!(result, Ok(3));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_failure_helpers() {
        let failure = Failure::Transient(7);
        assert!(failure.is_transient());
        assert_eq!(*failure.error(), 7);
        assert_eq!(failure.map(|n| n * 2), Failure::Transient(14));
        assert_eq!(Failure::Fatal("x").into_inner(), "x");
        assert_eq!(Failure::Fatal("gone").to_string(), "fatal: gone");
    }
}
