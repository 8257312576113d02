//! Circuit breaker guarding per-host orchestration.
//!
//! A host that keeps failing stops consuming rate-limiter capacity and
//! wall-clock time for the rest of a batch.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (one trial)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <---------------------------[success]----------------------------+
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// A single trial call is allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub reset_timeout: Duration,

    /// Upper bound on a single guarded call. Exceeding it counts as a failure.
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    trial_in_flight: bool,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_error_message: None,
            trial_in_flight: false,
        }
    }

    fn time_until_half_open(&self, reset_timeout: Duration) -> Duration {
        self.last_failure_time
            .map(|t| reset_timeout.saturating_sub(t.elapsed()))
            .unwrap_or(reset_timeout)
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = (inner.state == CircuitState::Open)
            .then(|| inner.time_until_half_open(self.config.reset_timeout));

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: runs the operation under `call_timeout`, tracks the outcome
    /// - Open: returns [`AppError::CircuitOpen`] without running it
    /// - HalfOpen: runs exactly one trial; concurrent callers are rejected
    ///
    /// Errors that do not trip the circuit (aborts, robots blocks, invalid
    /// URLs) pass through without being counted.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let is_trial = {
            let mut inner = self.lock_inner();
            self.maybe_transition_to_half_open(&mut inner);

            match inner.state {
                CircuitState::Closed => false,
                CircuitState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    true
                }
                CircuitState::HalfOpen => {
                    return Err(AppError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                CircuitState::Open => {
                    return Err(AppError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: inner.time_until_half_open(self.config.reset_timeout),
                    });
                }
            }
        };

        let result = match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.config.call_timeout.as_secs())),
        };

        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.should_trip_circuit() => self.record_failure(e),
            Err(_) => {
                if is_trial {
                    self.lock_inner().trial_in_flight = false;
                }
            }
        }

        result
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.name, "Circuit breaker closing after successful trial");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.last_error_message = None;
                inner.trial_in_flight = false;
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());

                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker trial failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::new();
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.reset_timeout
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }
}

/// One breaker per host, created on first use.
///
/// Idle hosts are evicted after `idle_ttl`, which also discards their state.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Cache<String, CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, idle_ttl: Duration) -> Self {
        Self {
            config,
            breakers: Cache::builder()
                .max_capacity(10_000)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `host` (lowercased), shared by every caller.
    pub fn for_host(&self, host: &str) -> CircuitBreaker {
        let key = host.to_ascii_lowercase();
        self.breakers.get_with(key.clone(), || {
            CircuitBreaker::new(format!("source:{key}"), self.config.clone())
        })
    }
}
