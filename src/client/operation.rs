//! Operation abstraction and the decorator stages layered over it.
//!
//! A request is a zero-argument async [`Operation`]. Resilience policies are
//! [`Stage`]s, each wrapping an operation into a new one. Stages are applied in
//! list order, so the last stage in the list is the outermost layer:
//!
//! ```text
//! [CircuitBreaker, Retry] over raw  =>  Retry( CircuitBreaker( raw ) )
//! ```

use crate::circuit_breaker::{CircuitBreaker, RetryPolicy};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// A zero-argument asynchronous unit of work that may be invoked repeatedly
#[async_trait]
pub trait Operation<T>: Send + Sync {
    async fn invoke(&self) -> Result<T>;
}

/// Shared, type-erased operation
pub type BoxOperation<T> = Arc<dyn Operation<T>>;

#[async_trait]
impl<T, F, Fut> Operation<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn invoke(&self) -> Result<T> {
        (self)().await
    }
}

/// A resilience policy applied around an operation
#[derive(Debug, Clone)]
pub enum Stage {
    /// Gate every invocation through a shared breaker
    CircuitBreaker(Arc<CircuitBreaker>),
    /// Re-invoke on failure; stops as soon as `breaker` would refuse
    Retry {
        policy: RetryPolicy,
        breaker: Option<Arc<CircuitBreaker>>,
    },
}

impl Stage {
    /// Wrap `inner` in this stage
    pub fn apply<T: Send + 'static>(self, inner: BoxOperation<T>) -> BoxOperation<T> {
        match self {
            Stage::CircuitBreaker(breaker) => Arc::new(BreakerOperation { breaker, inner }),
            Stage::Retry { policy, breaker } => Arc::new(RetryOperation {
                policy,
                breaker,
                inner,
            }),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::CircuitBreaker(_) => "circuit_breaker",
            Stage::Retry { .. } => "retry",
        }
    }
}

/// Fold `stages` over `raw`, first stage innermost
pub fn compose<T: Send + 'static>(raw: BoxOperation<T>, stages: Vec<Stage>) -> BoxOperation<T> {
    stages.into_iter().fold(raw, |inner, stage| {
        debug!(stage = stage.name(), "Applying stage");
        stage.apply(inner)
    })
}

struct BreakerOperation<T> {
    breaker: Arc<CircuitBreaker>,
    inner: BoxOperation<T>,
}

#[async_trait]
impl<T: Send + 'static> Operation<T> for BreakerOperation<T> {
    async fn invoke(&self) -> Result<T> {
        self.breaker.execute(move || self.inner.invoke()).await
    }
}

struct RetryOperation<T> {
    policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    inner: BoxOperation<T>,
}

impl<T: Send + 'static> RetryOperation<T> {
    async fn attempt(&self) -> Result<T> {
        if let Some(breaker) = &self.breaker {
            if let Err(e) = breaker.check_open().await {
                debug!(upstream = %breaker.target(), "Breaker open, abandoning retries");
                return Err(e);
            }
        }
        self.inner.invoke().await
    }
}

#[async_trait]
impl<T: Send + 'static> Operation<T> for RetryOperation<T> {
    async fn invoke(&self) -> Result<T> {
        let this = self;
        self.policy
            .execute_with_predicate(move || this.attempt(), |e| !e.is_circuit_open())
            .await
    }
}
