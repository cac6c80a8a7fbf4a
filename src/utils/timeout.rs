//! Timeout utilities for upstream calls
//!
//! This module provides the timeout settings used by the forwarding pipeline
//! and a helper that bounds any fallible future.

use std::time::Duration;

/// Timeout configuration for the upstream HTTP client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Upper bound for one upstream exchange, headers included (default: 300s)
    pub upstream_timeout: Duration,

    /// TCP/TLS connection establishment timeout (default: 10s)
    pub connect_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    pub fn new(upstream_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            upstream_timeout,
            connect_timeout,
        }
    }
}

/// Apply timeout to an async operation
///
/// The inner error is preserved; an elapsed deadline becomes
/// [`TimeoutError::Timeout`].
pub async fn with_timeout<T, E>(
    timeout: Duration,
    future: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, TimeoutError<E>> {
    match tokio::time::timeout(timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TimeoutError::Inner(err)),
        Err(_) => Err(TimeoutError::Timeout(timeout)),
    }
}

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutError::Timeout(_))
    }
}
