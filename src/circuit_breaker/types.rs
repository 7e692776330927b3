use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Cool-down elapsed, a single probe request is allowed at a time
    HalfOpen,
}

impl CircuitState {
    /// Gauge value used for metrics: 0 = closed, 1 = open, 2 = half-open
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of consecutive successes before clearing the counters and closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Cool-down in milliseconds before a probe is allowed. Also bounds the
    /// window in which failures count as consecutive.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate thresholds
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ClientError::Config(
                "Circuit breaker failure_threshold must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ClientError::Config(
                "Circuit breaker success_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one
    #[serde(default = "default_max_retries", alias = "retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of admitted requests
    pub total_requests: u64,
    /// Number of successful requests
    pub successful_requests: u64,
    /// Number of failed requests
    pub failed_requests: u64,
    /// Number of requests rejected (circuit open or probe in flight)
    pub rejected_requests: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
}
