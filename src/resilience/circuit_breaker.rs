// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for the two upstream dependencies.
//!
//! Sheds load when a dependency (source of truth, marketplace) is
//! sustained-unhealthy. Wraps async operations and trips on consecutive
//! failures. The operator surface reads breaker state and can reset a
//! tripped breaker, so the state machine is explicit rather than hidden
//! behind a third-party implementation.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if the dependency recovered, limited requests allowed

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Consecutive successes in half-open to close the circuit
    pub success_threshold: u32,
    /// How long to wait before attempting recovery (half-open)
    pub recovery_timeout: Duration,
    /// A quiet period this long clears the consecutive-failure count
    pub failure_reset_interval: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            failure_reset_interval: Duration::from_secs(300),
        }
    }
}

impl CircuitConfig {
    /// Source-of-truth dependency: trips fast, a broken ERP read makes
    /// every run pointless.
    #[must_use]
    pub fn sot() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            failure_reset_interval: Duration::from_secs(300),
        }
    }

    /// Marketplace dependency: higher threshold because 429s are expected
    /// and absorbed by the retrier before they could count as failures.
    #[must_use]
    pub fn marketplace() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
            failure_reset_interval: Duration::from_secs(600),
        }
    }

    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
            failure_reset_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                last_failure_at: None,
            }),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current circuit state. An elapsed open timeout is reported lazily:
    /// reading the state performs the Open -> HalfOpen transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.advance_open_timeout(&mut inner);
        inner.state
    }

    fn advance_open_timeout(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    info!(circuit = %self.name, "Circuit half-open, probing dependency");
                    crate::metrics::set_circuit_state(&self.name, CircuitState::HalfOpen as u8);
                }
            }
        }
    }

    /// Execute an async operation through the circuit breaker
    ///
    /// Takes a closure that returns a Future, allowing lazy evaluation:
    /// nothing runs when the circuit is open.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.lock();
            self.advance_open_timeout(&mut inner);
            if inner.state == CircuitState::Open {
                drop(inner);
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_call(&self.name, "rejected");
                return Err(CircuitError::Rejected);
            }
        }

        match f().await {
            Ok(result) => {
                self.on_success();
                self.successes.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call succeeded");
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(e) => {
                self.on_failure();
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call failed");
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!(circuit = %self.name, "Circuit closed, dependency recovered");
                    crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                // A long quiet period means earlier failures were unrelated.
                if let Some(last) = inner.last_failure_at {
                    if now.duration_since(last) >= self.config.failure_reset_interval {
                        inner.consecutive_failures = 0;
                    }
                }
                inner.last_failure_at = Some(now);
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                    crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
                }
            }
            CircuitState::HalfOpen => {
                // One failed probe reopens.
                inner.last_failure_at = Some(now);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!(circuit = %self.name, "Probe failed, circuit re-opened");
                crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker closed. Exposed to the operator surface.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        info!(circuit = %self.name, "Circuit manually reset");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Pre-configured circuit breakers for the two upstream dependencies
pub struct DependencyCircuits {
    /// Circuit breaker for source-of-truth reads
    pub sot: CircuitBreaker,
    /// Circuit breaker for marketplace writes
    pub marketplace: CircuitBreaker,
}

impl Default for DependencyCircuits {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyCircuits {
    /// Create dependency circuits with appropriate configs
    pub fn new() -> Self {
        Self {
            sot: CircuitBreaker::new("sot", CircuitConfig::sot()),
            marketplace: CircuitBreaker::new("marketplace", CircuitConfig::marketplace()),
        }
    }

    /// Get metrics for all circuits
    pub fn metrics(&self) -> DependencyCircuitMetrics {
        DependencyCircuitMetrics {
            sot_state: self.sot.state(),
            sot_calls: self.sot.calls_total(),
            sot_failures: self.sot.failures(),
            sot_rejections: self.sot.rejections(),
            marketplace_state: self.marketplace.state(),
            marketplace_calls: self.marketplace.calls_total(),
            marketplace_failures: self.marketplace.failures(),
            marketplace_rejections: self.marketplace.rejections(),
        }
    }
}

/// Aggregated metrics from both dependency circuits
#[derive(Debug, Clone)]
pub struct DependencyCircuitMetrics {
    pub sot_state: CircuitState,
    pub sot_calls: u64,
    pub sot_failures: u64,
    pub sot_rejections: u64,
    pub marketplace_state: CircuitState,
    pub marketplace_calls: u64,
    pub marketplace_failures: u64,
    pub marketplace_rejections: u64,
}
