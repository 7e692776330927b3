use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// Keyed store holding at most one circuit breaker per logical target.
///
/// Clones share the same map, so every client handed a clone observes the same
/// health state for a given key. Callers wanting isolation create a separate
/// registry.
#[derive(Debug, Clone, Default)]
pub struct BreakerRegistry {
    /// Circuit breakers per target
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker for `key`, creating it with `config` on first call.
    ///
    /// Later calls return the same instance and ignore `config`; use
    /// [`CircuitBreaker::set_config`] to change an existing breaker.
    pub fn get_or_create(&self, key: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(upstream = key, "Registering new circuit breaker");
                Arc::new(CircuitBreaker::new(key, config))
            })
            .clone()
    }

    /// Get the breaker for `key` if one exists
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|entry| entry.value().clone())
    }

    /// Discard the breaker for `key`. Clients already holding it keep their handle.
    pub fn remove(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(key).map(|(_, breaker)| breaker)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Get all target keys with circuit breakers
    pub fn targets(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Get the state of the breaker for `key`; unknown targets are closed
    pub async fn state(&self, key: &str) -> CircuitState {
        match self.get(key) {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    /// Get metrics for a target
    pub async fn metrics(&self, key: &str) -> Option<CircuitBreakerMetrics> {
        match self.get(key) {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// Get metrics for all targets
    pub async fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics, CircuitState)> {
        // Snapshot first so no shard lock is held across an await
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        join_all(breakers.into_iter().map(|(target, breaker)| async move {
            let metrics = breaker.metrics().await;
            let state = breaker.state().await;
            (target, metrics, state)
        }))
        .await
    }
}
