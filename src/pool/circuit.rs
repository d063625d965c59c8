//! Circuit breaker implementation for fault tolerance
//!
//! This module implements a circuit breaker with three states:
//! - Closed: Normal operation, requests are allowed
//! - Open: The upstream has failed, requests fail fast
//! - HalfOpen: Exactly one probe request is in flight
//!
//! Cool-down is evaluated lazily on the next call; there is no timer task.
//! All transitions happen under one mutex, so concurrent callers racing the
//! cool-down boundary see a single probe admitted and the rest rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::events::{EventBus, GatewayEvent};

/// Circuit breaker error types
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("Circuit breaker is open, retry in {retry_in:?}")]
    Open { retry_in: Duration },

    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests are allowed
    Closed,

    /// Upstream has failed - requests are rejected
    Open,

    /// Testing recovery - one probe allowed
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed
    pub cool_down_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_ms: 60_000,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls turned away without running the operation
    pub rejected: u64,
    /// Number of times the circuit has opened
    pub open_count: u64,
    pub time_in_state: Duration,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Set whenever `state` is Open
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    state_entered_at: Instant,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    rejected: u64,
    open_count: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            state_entered_at: Instant::now(),
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            rejected: 0,
            open_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Settles the outcome of an admitted call
///
/// A probe dropped before completing (cancelled by the caller) counts as a
/// failed probe so the circuit cannot stay half-open forever.
struct Outcome<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Outcome<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.record_success(self.admission);
        } else {
            self.breaker.record_failure(self.admission);
        }
    }
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            debug!("Half-open probe dropped before completion");
            self.breaker.record_failure(Admission::Probe);
        }
    }
}

/// Three-state failure gate around one upstream
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::new()),
            config,
            events,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker
    ///
    /// Fails with [`CircuitError::Open`] without calling `operation` while the
    /// circuit is open, or while a half-open probe is already in flight.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self
            .admit()
            .map_err(|retry_in| CircuitError::Open { retry_in })?;

        let outcome = Outcome {
            breaker: self,
            admission,
            settled: false,
        };

        match operation().await {
            Ok(value) => {
                outcome.settle(true);
                Ok(value)
            }
            Err(e) => {
                outcome.settle(false);
                Err(CircuitError::Inner(e))
            }
        }
    }

    pub fn get_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at
    }

    pub fn get_stats(&self) -> CircuitStats {
        let inner = self.lock();
        CircuitStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected: inner.rejected,
            open_count: inner.open_count,
            time_in_state: inner.state_entered_at.elapsed(),
        }
    }

    /// Manually close the circuit
    pub fn reset(&self) {
        let mut inner = self.lock();
        info!(from = %inner.state, "Manually resetting circuit to Closed");
        self.transition_to_closed(&mut inner);
    }

    /// Manually trip the circuit, starting a fresh cool-down
    pub fn force_open(&self) {
        let mut inner = self.lock();
        warn!(from = %inner.state, "Circuit forced open");
        inner.probe_in_flight = false;
        self.transition_to_open(&mut inner);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may run; `Err` carries the remaining cool-down
    fn admit(&self) -> Result<Admission, Duration> {
        let mut inner = self.lock();
        inner.total_requests += 1;

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),

            CircuitState::Open => {
                let cool_down = self.config.cool_down();
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(cool_down);

                if elapsed >= cool_down {
                    info!("Circuit transitioning from Open to HalfOpen");
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    inner.rejected += 1;
                    Err(cool_down - elapsed)
                }
            }

            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected += 1;
                    debug!("Rejecting request while half-open probe is in flight");
                    Err(Duration::ZERO)
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.total_successes += 1;

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::HalfOpen, Admission::Probe) => {
                info!("Probe succeeded, circuit transitioning from HalfOpen to Closed");
                self.transition_to_closed(&mut inner);
            }
            (state, Admission::Normal) => {
                // Admitted before the circuit opened; the probe decides recovery
                debug!(state = %state, "Late success ignored for state accounting");
            }
            (CircuitState::Open, Admission::Probe) => {
                warn!("Probe success recorded after the circuit reopened");
            }
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.total_failures += 1;

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures += 1;
                debug!(
                    consecutive_failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Request failed in Closed state"
                );

                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        consecutive_failures = inner.consecutive_failures,
                        "Circuit transitioning from Closed to Open"
                    );
                    self.transition_to_open(&mut inner);
                }
            }
            (CircuitState::HalfOpen, Admission::Probe) => {
                warn!("Probe failed, reopening circuit");
                inner.probe_in_flight = false;
                inner.consecutive_failures += 1;
                self.transition_to_open(&mut inner);
            }
            (CircuitState::Open, _) | (CircuitState::HalfOpen, Admission::Normal) => {
                inner.consecutive_failures += 1;
                debug!(state = %inner.state, "Late failure recorded");
            }
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        self.transition(inner, CircuitState::Closed);
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        inner.opened_at = Some(Instant::now());
        inner.open_count += 1;
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.state_entered_at = Instant::now();

        if from != to {
            self.events
                .publish(GatewayEvent::CircuitBreakerStateChange { from, to });
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.get_state())
            .field("config", &self.config)
            .finish()
    }
}
