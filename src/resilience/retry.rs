// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff honoring `Retry-After`.
//!
//! Provides configurable retry behavior for transient failures.
//! Different presets are available for different use cases.
//!
//! # Example
//!
//! ```
//! use catalog_sync::resilience::retry::RetryPolicy;
//!
//! // Auth: few attempts, fixed delay, everything retried
//! let auth = RetryPolicy::auth();
//! assert_eq!(auth.max_attempts, 3);
//! assert!(auth.retry_all);
//!
//! // Marketplace: patient exponential backoff, classified errors only
//! let marketplace = RetryPolicy::marketplace();
//! assert_eq!(marketplace.max_attempts, 8);
//! assert!(!marketplace.retry_all);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Errors the retrier can reason about.
///
/// A 429 carries the server's `Retry-After` wish; network failures and 5xx
/// are transient; everything else is terminal and rethrown immediately.
pub trait Recoverable {
    fn is_retriable(&self) -> bool;
    /// The server-requested backoff, if the error carried one.
    fn retry_after(&self) -> Option<Duration>;
}

/// Configuration for operation retry behavior.
///
/// Use the preset constructors:
/// - [`RetryPolicy::auth()`] - short fixed-delay retry for authentication
/// - [`RetryPolicy::marketplace()`] - patient backoff for marketplace pushes
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Retry every error regardless of classification (auth preset).
    pub retry_all: bool,
}

impl RetryPolicy {
    /// Authentication: 3 attempts, fixed 2 s between them, always retried.
    #[must_use]
    pub fn auth() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            factor: 1.0,
            max_delay: Duration::from_secs(2),
            retry_all: true,
        }
    }

    /// Marketplace pushes: 8 attempts, exponential from 2 s.
    /// Retriable errors only (network, 5xx, 429); 409 never reaches the
    /// retrier because the adapter maps it to success.
    #[must_use]
    pub fn marketplace() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(2),
            factor: 2.0,
            max_delay: Duration::from_secs(120),
            retry_all: false,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(10),
            retry_all: false,
        }
    }
}

/// Run `operation` under `policy`, sleeping between attempts.
///
/// When a failure carries `Retry-After`, that attempt's sleep is the
/// server's value plus one second; the running exponential delay still
/// advances so a later plain failure doesn't restart from the initial
/// delay. `on_retry` fires for every failure that will be retried,
/// before the sleep.
pub async fn retry_with_policy<F, Fut, T, E, H>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut on_retry: H,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Recoverable + std::fmt::Display,
    H: FnMut(&E),
{
    let mut delay = policy.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name, attempts
                    );
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if !policy.retry_all && !err.is_retriable() {
                    return Err(err);
                }
                if attempts >= policy.max_attempts {
                    return Err(err);
                }

                on_retry(&err);

                // Server wish wins over our own schedule for this attempt.
                let this_sleep = match err.retry_after() {
                    Some(wish) => wish + Duration::from_secs(1),
                    None => delay,
                };

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, policy.max_attempts, err, this_sleep
                );

                sleep(this_sleep).await;
                delay = delay.mul_f64(policy.factor).min(policy.max_delay);
            }
        }
    }
}
