//! Circuit Breaker
//!
//! Stops calling a failing dependency until a cooldown elapses, then probes
//! recovery with a single trial call.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{IdentityError, NetworkError};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single trial request is allowed.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed.
    pub reset_timeout: Duration,
    /// Per-call timeout; elapsing counts as a failure.
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        DEFAULT_CIRCUIT_BREAKER_CONFIG
    }
}

/// Default circuit breaker configuration.
pub const DEFAULT_CIRCUIT_BREAKER_CONFIG: CircuitBreakerConfig = CircuitBreakerConfig {
    failure_threshold: 5,
    reset_timeout: Duration::from_secs(60),
    call_timeout: None,
};

/// Snapshot of a breaker's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub status: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    pub total_requests: u32,
    pub successful_requests: u32,
    pub failed_requests: u32,
    pub rejected_requests: u32,
    pub timed_out_requests: u32,
    pub state_transitions: u32,
}

/// Failure of a call made through a circuit breaker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit breaker is open")]
    Open,

    /// The per-call timeout elapsed before the operation finished.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// The operation's own error, if that is what failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CircuitBreakerError<IdentityError>> for IdentityError {
    fn from(error: CircuitBreakerError<IdentityError>) -> Self {
        match error {
            CircuitBreakerError::Open => IdentityError::Network(NetworkError::CircuitOpen),
            CircuitBreakerError::Timeout(timeout) => {
                IdentityError::Network(NetworkError::Timeout { timeout })
            }
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

struct BreakerInner {
    status: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one operation.
///
/// State belongs to this instance alone; two breakers wrapping related calls
/// never share failure counts.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    stats: Mutex<CircuitBreakerStats>,
}

impl CircuitBreaker {
    /// Create new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                status: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            stats: Mutex::new(CircuitBreakerStats::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation through the circuit breaker.
    ///
    /// When a per-call timeout is configured the operation future is dropped
    /// once the timer wins, cancelling it at its next suspension point. Work
    /// it already started (a request on the wire, for instance) is not undone.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.stats.lock().total_requests += 1;

        let admission = match self.admit() {
            Some(admission) => admission,
            None => {
                self.stats.lock().rejected_requests += 1;
                debug!("Circuit open, rejecting call");
                return Err(CircuitBreakerError::Open);
            }
        };

        let mut trial = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let outcome = match self.config.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result.map_err(CircuitBreakerError::Inner),
                Err(_) => {
                    self.stats.lock().timed_out_requests += 1;
                    Err(CircuitBreakerError::Timeout(timeout))
                }
            },
            None => operation().await.map_err(CircuitBreakerError::Inner),
        };

        trial.armed = false;

        match outcome {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(error) => {
                self.record_failure(admission);
                Err(error)
            }
        }
    }

    /// Get a snapshot of the current state.
    ///
    /// Reports `Open` until a call observes the elapsed reset timeout.
    pub fn state(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }

    /// Get the current status.
    pub fn status(&self) -> CircuitState {
        self.inner.lock().status
    }

    /// Reset the circuit breaker to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.status = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Get circuit breaker statistics.
    pub fn get_stats(&self) -> CircuitBreakerStats {
        self.stats.lock().clone()
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();

        match inner.status {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if !elapsed {
                    return None;
                }
                inner.status = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                self.stats.lock().state_transitions += 1;
                info!("Circuit half-open, allowing trial call");
                Some(Admission::Trial)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        self.stats.lock().successful_requests += 1;

        match (inner.status, admission) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.status = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                self.stats.lock().state_transitions += 1;
                info!("Circuit closed after successful trial");
            }
            // A call admitted before the circuit opened; it proves nothing.
            _ => {}
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        self.stats.lock().failed_requests += 1;

        match (inner.status, admission) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.status = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    self.stats.lock().state_transitions += 1;
                    warn!(
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit opened"
                    );
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.status = CircuitState::Open;
                inner.consecutive_failures += 1;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                self.stats.lock().state_transitions += 1;
                warn!("Trial call failed, circuit re-opened");
            }
            _ => {}
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Releases the half-open trial slot if the call future is dropped mid-trial.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// An operation bound to its own circuit breaker.
pub struct GuardedOperation<F> {
    operation: F,
    breaker: CircuitBreaker,
}

impl<F> GuardedOperation<F> {
    /// Call the wrapped operation through the breaker.
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, CircuitBreakerError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker.call(|| (self.operation)(args)).await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }
}

/// Bind `operation` to a fresh circuit breaker.
pub fn create_circuit_breaker<F>(
    operation: F,
    config: CircuitBreakerConfig,
) -> GuardedOperation<F> {
    GuardedOperation {
        operation,
        breaker: CircuitBreaker::new(config),
    }
}
