use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::{ClientError, Result};
use crate::metrics;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// No half-open probe in flight
const NO_PROBE: u64 = 0;

/// Circuit breaker for a single logical target
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Target identifier (registry key)
    target: String,
    /// Current state
    state: RwLock<State>,
    /// Token of the half-open probe in flight, `NO_PROBE` when the slot is free
    probe: AtomicU64,
    /// Source of probe tokens
    next_probe: AtomicU64,
}

#[derive(Debug)]
struct State {
    /// Active configuration, replaceable through `set_config`
    config: CircuitBreakerConfig,
    /// Current circuit state
    circuit_state: CircuitState,
    /// Failures inside the current failure window
    consecutive_failures: u32,
    /// Successes since the last failure or reset
    consecutive_successes: u32,
    /// Time of the most recent failure; the cool-down is measured from here
    last_failure_at: Option<Instant>,
    /// Time the circuit last tripped
    opened_at: Option<Instant>,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

/// How a call was let through the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Admitted while closed
    Normal,
    /// Admitted as the single half-open probe holding this token
    Probe(u64),
}

/// Frees the probe slot if the probe is dropped before reporting back
struct ProbeSlot<'a> {
    probe: &'a AtomicU64,
    token: u64,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        // No-op once the outcome was recorded or a newer probe holds the slot
        let _ = self
            .probe
            .compare_exchange(self.token, NO_PROBE, Ordering::SeqCst, Ordering::SeqCst);
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let target = target.into();
        info!(
            upstream = %target,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout_ms = config.timeout_ms,
            "Creating circuit breaker"
        );
        metrics::record_circuit_breaker_state(&target, CircuitState::Closed.as_gauge());

        Self {
            target,
            state: RwLock::new(State {
                config,
                circuit_state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                opened_at: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
            probe: AtomicU64::new(NO_PROBE),
            next_probe: AtomicU64::new(NO_PROBE + 1),
        }
    }

    /// Target this breaker guards
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run `operation` under breaker supervision.
    ///
    /// Fails fast with [`ClientError::CircuitOpen`] without invoking the
    /// operation while the circuit is open. Operation errors are counted and
    /// returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.acquire().await?;
        let _slot = match admission {
            Admission::Probe(token) => Some(ProbeSlot {
                probe: &self.probe,
                token,
            }),
            Admission::Normal => None,
        };

        match operation().await {
            Ok(value) => {
                self.on_success(admission).await;
                Ok(value)
            }
            Err(e) => {
                debug!(upstream = %self.target, error = %e, "Supervised operation failed");
                self.on_failure(admission).await;
                Err(e)
            }
        }
    }

    /// Whether a call made right now would be refused
    pub async fn is_open(&self) -> bool {
        let state = self.state.read().await;
        self.refuses(&state)
    }

    /// Refuse with [`ClientError::CircuitOpen`] when a call made now would be
    /// refused, counting the refusal like one made by `execute`
    pub async fn check_open(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if self.refuses(&state) {
            state.metrics.rejected_requests += 1;
            debug!(upstream = %self.target, state = %state.circuit_state, "Refusing call");
            return Err(self.rejection());
        }
        Ok(())
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Get the active configuration
    pub async fn config(&self) -> CircuitBreakerConfig {
        self.state.read().await.config.clone()
    }

    /// Replace the active configuration. Counters and state are kept.
    pub async fn set_config(&self, config: CircuitBreakerConfig) {
        let mut state = self.state.write().await;
        if state.config != config {
            debug!(
                upstream = %self.target,
                failure_threshold = config.failure_threshold,
                success_threshold = config.success_threshold,
                timeout_ms = config.timeout_ms,
                "Updating circuit breaker configuration"
            );
            state.config = config;
        }
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    pub async fn consecutive_successes(&self) -> u32 {
        self.state.read().await.consecutive_successes
    }

    /// Get metrics
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.read().await.metrics.clone()
    }

    /// Force the circuit closed and clear all counters.
    /// A probe still in flight is treated as stale when it reports back.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        info!(upstream = %self.target, from = %state.circuit_state, "Circuit breaker reset");
        self.transition_to_closed(&mut state);
        state.last_failure_at = None;
    }

    fn refuses(&self, state: &State) -> bool {
        match state.circuit_state {
            CircuitState::Closed => false,
            CircuitState::Open => state
                .last_failure_at
                .is_some_and(|at| at.elapsed() < state.config.timeout()),
            CircuitState::HalfOpen => self.probe.load(Ordering::SeqCst) != NO_PROBE,
        }
    }

    /// Claim the probe slot. Caller holds the state write lock.
    fn claim_probe(&self) -> Option<u64> {
        let token = self.next_probe.fetch_add(1, Ordering::SeqCst);
        self.probe
            .compare_exchange(NO_PROBE, token, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| token)
    }

    /// Release the slot if `token` still holds it
    fn release_probe(&self, token: u64) -> bool {
        self.probe
            .compare_exchange(token, NO_PROBE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn acquire(&self) -> Result<Admission> {
        let mut state = self.state.write().await;
        let timeout = state.config.timeout();

        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_requests += 1;
                Ok(Admission::Normal)
            }
            CircuitState::Open => {
                let elapsed = state.last_failure_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < timeout => {
                        state.metrics.rejected_requests += 1;
                        debug!(
                            upstream = %self.target,
                            time_remaining = ?timeout - elapsed,
                            "Circuit breaker open, rejecting request"
                        );
                        Err(self.rejection())
                    }
                    _ => {
                        self.transition_to_half_open(&mut state);
                        self.admit_probe(&mut state)
                    }
                }
            }
            CircuitState::HalfOpen => self.admit_probe(&mut state),
        }
    }

    fn admit_probe(&self, state: &mut State) -> Result<Admission> {
        match self.claim_probe() {
            Some(token) => {
                state.metrics.total_requests += 1;
                debug!(upstream = %self.target, "Allowing half-open probe request");
                Ok(Admission::Probe(token))
            }
            None => {
                state.metrics.rejected_requests += 1;
                debug!(upstream = %self.target, "Probe in flight, rejecting request");
                Err(self.rejection())
            }
        }
    }

    async fn on_success(&self, admission: Admission) {
        let mut state = self.state.write().await;
        state.metrics.successful_requests += 1;

        match (state.circuit_state, admission) {
            (CircuitState::HalfOpen, Admission::Probe(token)) if self.release_probe(token) => {
                state.consecutive_successes += 1;

                debug!(
                    upstream = %self.target,
                    consecutive_successes = state.consecutive_successes,
                    threshold = state.config.success_threshold,
                    "Half-open probe request succeeded"
                );

                if state.consecutive_successes >= state.config.success_threshold {
                    self.transition_to_closed(&mut state);
                }
            }
            (CircuitState::Closed, Admission::Normal) => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= state.config.success_threshold {
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                }
            }
            (circuit_state, _) => {
                debug!(
                    upstream = %self.target,
                    state = %circuit_state,
                    "Ignoring success of a request admitted before the last transition"
                );
            }
        }
    }

    async fn on_failure(&self, admission: Admission) {
        let mut state = self.state.write().await;
        state.metrics.failed_requests += 1;
        let now = Instant::now();

        match (state.circuit_state, admission) {
            (CircuitState::HalfOpen, Admission::Probe(token)) if self.release_probe(token) => {
                warn!(
                    upstream = %self.target,
                    "Half-open probe request failed, reopening circuit"
                );
                self.transition_to_open(&mut state, now);
            }
            (CircuitState::Closed, Admission::Normal) => {
                state.consecutive_successes = 0;

                let window = state.config.timeout();
                let in_window = state
                    .last_failure_at
                    .is_some_and(|at| now.duration_since(at) < window);
                if in_window {
                    state.consecutive_failures += 1;
                } else {
                    state.consecutive_failures = 1;
                }
                state.last_failure_at = Some(now);

                debug!(
                    upstream = %self.target,
                    consecutive_failures = state.consecutive_failures,
                    threshold = state.config.failure_threshold,
                    "Request failed in closed state"
                );

                if state.consecutive_failures >= state.config.failure_threshold {
                    self.transition_to_open(&mut state, now);
                }
            }
            (CircuitState::Open, _) => {
                // A straggler failing while open pushes the cool-down out.
                state.last_failure_at = Some(now);
                debug!(upstream = %self.target, "Recording failure in open state");
            }
            (circuit_state, _) => {
                debug!(
                    upstream = %self.target,
                    state = %circuit_state,
                    "Ignoring failure of a request admitted before the last transition"
                );
            }
        }
    }

    fn rejection(&self) -> ClientError {
        metrics::record_circuit_breaker_rejection(&self.target);
        ClientError::CircuitOpen(self.target.clone())
    }

    /// Transition to open state
    fn transition_to_open(&self, state: &mut State, now: Instant) {
        info!(
            upstream = %self.target,
            consecutive_failures = state.consecutive_failures,
            "Circuit breaker opening"
        );

        self.record_transition(state.circuit_state, CircuitState::Open);
        state.circuit_state = CircuitState::Open;
        state.opened_at = Some(now);
        state.last_failure_at = Some(now);
        state.consecutive_successes = 0;
        state.metrics.circuit_opened_count += 1;
    }

    /// Transition to half-open state
    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            upstream = %self.target,
            timeout_ms = state.config.timeout_ms,
            open_for = ?state.opened_at.map(|at| at.elapsed()),
            "Circuit breaker transitioning to half-open"
        );

        self.record_transition(state.circuit_state, CircuitState::HalfOpen);
        state.circuit_state = CircuitState::HalfOpen;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.metrics.circuit_half_opened_count += 1;
    }

    /// Transition to closed state
    fn transition_to_closed(&self, state: &mut State) {
        if state.circuit_state != CircuitState::Closed {
            info!(
                upstream = %self.target,
                consecutive_successes = state.consecutive_successes,
                "Circuit breaker closing"
            );
            self.record_transition(state.circuit_state, CircuitState::Closed);
            state.metrics.circuit_closed_count += 1;
        }

        state.circuit_state = CircuitState::Closed;
        state.opened_at = None;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        self.probe.store(NO_PROBE, Ordering::SeqCst);
    }

    fn record_transition(&self, from: CircuitState, to: CircuitState) {
        metrics::record_circuit_breaker_transition(&self.target, &from.to_string(), &to.to_string());
        metrics::record_circuit_breaker_state(&self.target, to.as_gauge());
    }
}
