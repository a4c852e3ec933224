//! Resilience
//!
//! Resilience patterns for calls against the identity service and any other
//! unreliable dependency.
//!
//! This module provides:
//!
//! - **Retry**: Exponential backoff retry with additive jitter
//! - **Circuit Breaker**: Fail-fast protection for a failing dependency

pub mod circuit_breaker;
pub mod retry;

// Retry
pub use retry::{
    calculate_delay, create_retryable, is_retryable_error, is_retryable_message, with_retry,
    OnRetry, RetryExecutor, RetryOptions, RetryStats, Retryable, ShouldRetry,
};

// Circuit Breaker
pub use circuit_breaker::{
    create_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerState, CircuitBreakerStats, CircuitState, GuardedOperation,
    DEFAULT_CIRCUIT_BREAKER_CONFIG,
};
