use crate::error::{ClientError, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ClientError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        // Register all metrics with descriptions
        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "resilient_requests_total",
            "Total number of outbound requests by outcome"
        );
        describe_histogram!(
            "resilient_request_duration_seconds",
            "Outbound request latencies in seconds, retries included"
        );
        describe_counter!(
            "resilient_retries_total",
            "Total number of retry attempts scheduled"
        );

        // Circuit breaker metrics
        describe_gauge!(
            "resilient_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "resilient_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_counter!(
            "resilient_circuit_breaker_rejections_total",
            "Total number of calls refused by an open circuit breaker"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Get the Prometheus metrics handle
    pub fn handle(&self) -> Arc<PrometheusHandle> {
        self.handle.clone()
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record an outbound request metric
pub fn record_request(upstream: &str, method: &str, outcome: &str, duration: f64) {
    let labels = [
        ("upstream", upstream.to_string()),
        ("method", method.to_string()),
        ("outcome", outcome.to_string()),
    ];

    counter!("resilient_requests_total", &labels).increment(1);
    histogram!("resilient_request_duration_seconds", &labels).record(duration);
}

/// Record a scheduled retry
pub fn record_retry() {
    counter!("resilient_retries_total").increment(1);
}

/// Record circuit breaker state
/// State: 0 = Closed, 1 = Open, 2 = HalfOpen
pub fn record_circuit_breaker_state(upstream: &str, state: u8) {
    let labels = [("upstream", upstream.to_string())];
    gauge!("resilient_circuit_breaker_state", &labels).set(state as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(upstream: &str, from_state: &str, to_state: &str) {
    let labels = [
        ("upstream", upstream.to_string()),
        ("from", from_state.to_string()),
        ("to", to_state.to_string()),
    ];
    counter!("resilient_circuit_breaker_transitions_total", &labels).increment(1);
}

/// Record a call refused by an open breaker
pub fn record_circuit_breaker_rejection(upstream: &str) {
    let labels = [("upstream", upstream.to_string())];
    counter!("resilient_circuit_breaker_rejections_total", &labels).increment(1);
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    upstream: String,
    method: String,
}

impl Timer {
    /// Start a new timer for a request
    pub fn new(upstream: String, method: String) -> Self {
        Self {
            start: Instant::now(),
            upstream,
            method,
        }
    }

    /// Record the elapsed time with the given outcome
    pub fn record(self, outcome: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(&self.upstream, &self.method, outcome, duration);
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
