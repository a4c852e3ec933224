//! Retry Logic
//!
//! Exponential backoff retry with additive jitter for any fallible async
//! operation.

use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::IdentityError;

/// Predicate deciding whether an error is worth another attempt.
pub type ShouldRetry<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Observer invoked before each backoff sleep with the failed attempt number.
pub type OnRetry<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound of the jitter added on top of the computed delay.
const MAX_JITTER_FRACTION: f64 = 0.1;

/// Substrings (lowercase) that mark an error message as transient.
const RETRYABLE_VOCABULARY: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "econnaborted",
    "etimedout",
    "enotfound",
    "socket hang up",
    "connection",
];

/// Retry configuration.
pub struct RetryOptions<E> {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Retryability predicate; defaults to always retrying.
    pub should_retry: ShouldRetry<E>,
    /// Retry observer; defaults to a no-op.
    pub on_retry: OnRetry<E>,
}

impl<E> RetryOptions<E> {
    /// Create options with the default policy.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            should_retry: Arc::new(|_| true),
            on_retry: Arc::new(|_, _| {}),
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn should_retry(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn on_retry(mut self, observer: impl Fn(u32, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Arc::new(observer);
        self
    }

    /// Delay that follows the given failed attempt.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        calculate_delay(
            attempt_number,
            self.initial_delay,
            self.max_delay,
            self.backoff_multiplier,
        )
    }
}

impl RetryOptions<IdentityError> {
    /// Default policy restricted to transient identity errors.
    pub fn transient() -> Self {
        Self::new().should_retry(is_retryable_error)
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

/// Compute the backoff delay after `attempt_number` (1-based) failed.
///
/// `min(initial * multiplier^(attempt-1), max)` plus a jitter drawn from
/// `[0, 10%]` of that value. Jitter is only ever added, so the result lies in
/// `[base, base * 1.1]` and never exceeds `max_delay * 1.1`.
pub fn calculate_delay(
    attempt_number: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
) -> Duration {
    let max_ms = max_delay.as_secs_f64() * 1000.0;
    let exponent = attempt_number.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_ms = initial_delay.as_secs_f64() * 1000.0 * backoff_multiplier.powi(exponent);

    let capped_ms = if base_ms.is_finite() {
        base_ms.clamp(0.0, max_ms)
    } else {
        max_ms
    };

    let jitter_ms = rand::thread_rng().gen_range(0.0..=MAX_JITTER_FRACTION) * capped_ms;

    Duration::from_secs_f64((capped_ms + jitter_ms) / 1000.0)
}

/// Check a message against the transient-failure vocabulary.
pub fn is_retryable_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_VOCABULARY
        .iter()
        .any(|needle| message.contains(needle))
}

/// Default retryability classification for identity errors.
///
/// Network-layer failures and HTTP 429/502/503/504 are retryable. Other
/// server and protocol errors are retryable when their message uses
/// network/timeout vocabulary. Credential, request and local errors never are,
/// whatever their message wraps; neither is an open circuit.
pub fn is_retryable_error(error: &IdentityError) -> bool {
    match error {
        IdentityError::Network(e) => e.is_retryable(),
        IdentityError::RateLimit { .. } => true,
        IdentityError::Server { status, message } => {
            matches!(status, 502 | 503 | 504) || is_retryable_message(message)
        }
        IdentityError::Protocol(e) => is_retryable_message(&e.to_string()),
        IdentityError::Authentication { .. }
        | IdentityError::Validation { .. }
        | IdentityError::Permission { .. }
        | IdentityError::NotFound { .. }
        | IdentityError::Conflict { .. }
        | IdentityError::Token(_)
        | IdentityError::Configuration(_)
        | IdentityError::Webhook(_)
        | IdentityError::Storage(_) => false,
    }
}

/// Retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

async fn run_with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<E>,
    stats: Option<&Mutex<RetryStats>>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt_number = 1;

    loop {
        if let Some(stats) = stats {
            stats.lock().total_attempts += 1;
        }

        match operation().await {
            Ok(result) => {
                if attempt_number > 1 {
                    debug!(attempt = attempt_number, "Operation succeeded after retry");
                    if let Some(stats) = stats {
                        stats.lock().successful_retries += 1;
                    }
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt_number >= max_attempts || !(options.should_retry)(&error) {
                    if let Some(stats) = stats {
                        stats.lock().failed_operations += 1;
                    }
                    return Err(error);
                }

                (options.on_retry)(attempt_number, &error);

                let delay = options.delay_for(attempt_number);
                warn!(
                    attempt = attempt_number,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt_number += 1;
            }
        }
    }
}

/// Run `operation` under the retry policy.
///
/// The operation is invoked at most `max_attempts` times. A failure for which
/// `should_retry` returns false, or the failure of the last attempt, is
/// returned immediately without a further delay.
pub async fn with_retry<T, E, F, Fut>(operation: F, options: &RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run_with_retry(operation, options, None).await
}

/// Retry executor that keeps statistics across calls.
pub struct RetryExecutor<E> {
    options: RetryOptions<E>,
    stats: Mutex<RetryStats>,
}

impl<E> RetryExecutor<E> {
    /// Create new retry executor.
    pub fn new(options: RetryOptions<E>) -> Self {
        Self {
            options,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    /// Execute an operation with retry logic.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        run_with_retry(operation, &self.options, Some(&self.stats)).await
    }

    pub fn options(&self) -> &RetryOptions<E> {
        &self.options
    }

    /// Get retry statistics.
    pub fn get_stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }
}

/// A function wrapped with a retry policy, called with the same arguments
/// and returning the same result type as the original.
pub struct Retryable<F, E> {
    function: F,
    options: RetryOptions<E>,
}

impl<F, E> Retryable<F, E> {
    /// Invoke the wrapped function; `args` is cloned for every attempt.
    pub async fn call<A, T, Fut>(&self, args: A) -> Result<T, E>
    where
        A: Clone,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry(|| (self.function)(args.clone()), &self.options).await
    }
}

/// Wrap `function` so every call goes through [`with_retry`].
pub fn create_retryable<F, E>(function: F, options: RetryOptions<E>) -> Retryable<F, E> {
    Retryable { function, options }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NetworkError, TokenError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options<E>() -> RetryOptions<E> {
        RetryOptions::new()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_retry_options_default() {
        let options = RetryOptions::<IdentityError>::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.initial_delay, Duration::from_millis(1000));
        assert_eq!(options.max_delay, Duration::from_millis(10_000));
        assert_eq!(options.backoff_multiplier, 2.0);
        assert!((options.should_retry)(&IdentityError::Validation {
            message: "bad".into()
        }));
    }

    #[test]
    fn test_calculate_delay_bounds() {
        let initial = Duration::from_millis(1000);
        let max = Duration::from_millis(10_000);

        for _ in 0..200 {
            let d1 = calculate_delay(1, initial, max, 2.0).as_millis();
            let d2 = calculate_delay(2, initial, max, 2.0).as_millis();
            let d3 = calculate_delay(3, initial, max, 2.0).as_millis();
            assert!((1000..=1100).contains(&d1), "attempt 1: {}", d1);
            assert!((2000..=2200).contains(&d2), "attempt 2: {}", d2);
            assert!((4000..=4400).contains(&d3), "attempt 3: {}", d3);
        }
    }

    #[test]
    fn test_calculate_delay_never_exceeds_jittered_cap() {
        let initial = Duration::from_millis(1000);
        let max = Duration::from_millis(10_000);

        for attempt in 1..40 {
            let delay = calculate_delay(attempt, initial, max, 2.0).as_millis();
            assert!(delay <= 11_000, "attempt {}: {}", attempt, delay);
        }
        assert!(calculate_delay(u32::MAX, initial, max, 2.0).as_millis() >= 10_000);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&IdentityError::Network(
            NetworkError::ConnectionFailed {
                message: "refused".into()
            }
        )));
        assert!(is_retryable_error(&IdentityError::RateLimit {
            message: "slow down".into(),
            retry_after: None
        }));
        for status in [502, 503, 504] {
            assert!(is_retryable_error(&IdentityError::Server {
                status,
                message: String::new()
            }));
        }
        assert!(!is_retryable_error(&IdentityError::Server {
            status: 500,
            message: "boom".into()
        }));
        assert!(is_retryable_error(&IdentityError::Server {
            status: 500,
            message: "Upstream Timed Out".into()
        }));
        assert!(!is_retryable_error(&IdentityError::Network(
            NetworkError::CircuitOpen
        )));
        assert!(!is_retryable_error(&IdentityError::Validation {
            message: "email is required".into()
        }));
    }

    #[test]
    fn test_wrapped_network_vocabulary_is_not_retryable() {
        assert!(!is_retryable_error(&IdentityError::Authentication {
            message: "Session expired: Network error: Connection failed: refused".into()
        }));
        assert!(!is_retryable_error(&IdentityError::Token(
            TokenError::RefreshFailed {
                message: "connection reset".into()
            }
        )));
        assert!(!is_retryable_error(&IdentityError::NotFound {
            message: "timeout policy not found".into()
        }));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);

        let result = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok("done")
                }
            },
            &fast_options().max_attempts(3),
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_should_retry_false_stops_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
            &fast_options().max_attempts(10).should_retry(|_| false),
        )
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_return_last_error() {
        let calls = AtomicU32::new(0);
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();

        let result: Result<(), u32> = with_retry(
            || async { Err(calls.fetch_add(1, Ordering::SeqCst)) },
            &fast_options()
                .max_attempts(3)
                .on_retry(move |attempt, error: &u32| sink.lock().push((attempt, *error))),
        )
        .await;

        assert_eq!(result, Err(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*observed.lock(), vec![(1, 0), (2, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);

        let _: Result<(), ()> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(())
            },
            &RetryOptions::new().max_attempts(3),
        )
        .await;

        // 1000..=1100 then 2000..=2200
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed <= Duration::from_millis(3301));
    }

    #[tokio::test]
    async fn test_executor_stats() {
        let executor = RetryExecutor::new(fast_options::<&str>().max_attempts(2));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("once")
                } else {
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result, Ok(1));
        let stats = executor.get_stats();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.failed_operations, 0);
    }

    #[tokio::test]
    async fn test_create_retryable_preserves_shape() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let add = create_retryable(
            move |(a, b): (u32, u32)| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("flaky")
                    } else {
                        Ok(a + b)
                    }
                }
            },
            fast_options(),
        );

        assert_eq!(add.call((2, 3)).await, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
