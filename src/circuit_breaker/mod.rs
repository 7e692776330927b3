pub mod breaker;
pub mod registry;
pub mod retry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use registry::BreakerRegistry;
pub use retry::RetryPolicy;
pub use types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryConfig};
