pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod server;

pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy,
};
pub use client::{HttpResponse, RequestSpec, ResilientClient};
pub use error::{ClientError, Result};
