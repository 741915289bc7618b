//! Per-service circuit breakers.
//!
//! # State transitions
//! ```text
//! Closed   -> Open:     consecutive failures reach failure_threshold
//! Open     -> HalfOpen: first admission check after reset_timeout has elapsed
//! HalfOpen -> Closed:   half_open_success_threshold successes
//! HalfOpen -> Open:     any failure
//! ```
//!
//! All state lives behind one `std::sync::Mutex` per breaker. The expiry check and
//! the Open -> HalfOpen transition happen inside the same critical section, and the
//! lock is never held across an `.await`.
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use thiserror::Error;

use crate::core::registry::{BreakerSettings, ServiceRegistry};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of a breaker-guarded call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call without invoking it.
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// The call ran and failed; the failure has been recorded.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

/// Three-state breaker for a single service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // The guarded data is plain counters, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Run `call` under breaker protection. `Err` from the call counts as a failure.
    /// When the breaker disallows the call it is never invoked.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Admission check. May move an expired Open breaker to HalfOpen.
    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    pub fn record_success(&self) {
        if self.settings.enabled {
            self.record_success_inner();
        }
    }

    pub fn record_failure(&self) {
        if self.settings.enabled {
            self.record_failure_at(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub(crate) fn allow_request_at(&self, now: Instant) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner.last_failure.is_none_or(|at| {
                    now.saturating_duration_since(at) > self.settings.reset_timeout
                });
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    tracing::info!(service = %self.name, "Circuit breaker half-open, probing backend");
                }
                expired
            }
        }
    }

    fn record_success_inner(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.settings.half_open_success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_successes = 0;
                    tracing::info!(service = %self.name, "Circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.last_failure = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        service = %self.name,
                        failure_count = inner.failure_count,
                        threshold = self.settings.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                tracing::warn!(service = %self.name, "Circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }
}

/// One breaker per registered service, created once and never replaced.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerPool {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerPool {
    pub fn from_registry(registry: &ServiceRegistry) -> Self {
        let breakers = registry
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    Arc::new(CircuitBreaker::new(&d.name, d.circuit_breaker.clone())),
                )
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).cloned()
    }
}
