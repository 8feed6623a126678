//! Retry With Backoff
//!
//! A fixed retry schedule expressed as data, plus the helper that drives an
//! async operation through it. Shared by the reporter's delivery loop and
//! the relational store's reconnect path.

use std::future::Future;
use std::time::Duration;

/// Ordered list of delays slept before each retry.
///
/// The first attempt runs immediately; `delays.len()` further attempts
/// follow, each preceded by the matching delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
}

impl BackoffPolicy {
    /// Create a policy from an explicit schedule.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// The retry delays, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Total number of attempts, including the first one.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for BackoffPolicy {
    /// Three retries sleeping 1s, 3s and 5s.
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned on exhaustion.
///
/// Attempts are strictly sequential.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &BackoffPolicy,
    operation: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut result = op().await;

    for (attempt, delay) in policy.delays().iter().enumerate() {
        match &result {
            Ok(_) => break,
            Err(e) if !is_retryable(e) => break,
            Err(e) => {
                tracing::warn!(
                    "{} failed: {}, retry {}/{} in {:?}",
                    operation,
                    e,
                    attempt + 1,
                    policy.delays().len(),
                    delay
                );
            }
        }
        tokio::time::sleep(*delay).await;
        result = op().await;
    }

    result
}
