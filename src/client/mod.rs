//! Resilient HTTP client composing circuit breaking and retry around requests.

pub mod operation;
pub mod request;

pub use operation::{compose, BoxOperation, Operation, Stage};
pub use request::{HttpResponse, RequestSpec};

use crate::circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryPolicy,
};
use crate::config::UpstreamConfig;
use crate::error::{ClientError, Result};
use crate::metrics::Timer;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

/// Per-request timeout used when none is configured
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// HTTP client for one logical target with optional retry and circuit breaking
#[derive(Debug)]
pub struct ResilientClient {
    /// Registry key identifying the target
    key: String,
    base_url: Url,
    http: reqwest::Client,
    registry: BreakerRegistry,
    retry: Option<RetryConfig>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    /// Shared breaker, bound on first circuit-breaking use
    breaker: OnceCell<Arc<CircuitBreaker>>,
}

impl ResilientClient {
    /// Create a client for `base_url` with the default timeout and no policies
    pub fn new(base_url: &str, registry: BreakerRegistry) -> Result<Self> {
        let http = build_http_client(Duration::from_millis(DEFAULT_TIMEOUT_MS), HeaderMap::new())?;
        Self::with_http_client(base_url, registry, http)
    }

    /// Create a client around an already configured reqwest client
    pub fn with_http_client(
        base_url: &str,
        registry: BreakerRegistry,
        http: reqwest::Client,
    ) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "Base URL must use http or https: {}",
                base_url
            )));
        }

        Ok(Self {
            key: base_url.trim_end_matches('/').to_string(),
            base_url: parsed,
            http,
            registry,
            retry: None,
            circuit_breaker: None,
            breaker: OnceCell::new(),
        })
    }

    /// Build a client from an upstream entry of the configuration file
    pub fn from_upstream(upstream: &UpstreamConfig, registry: BreakerRegistry) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &upstream.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Config(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Config(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let http = build_http_client(upstream.timeout(), headers)?;
        let mut client = Self::with_http_client(&upstream.base_url, registry, http)?;
        client.retry = upstream.retry.clone();
        client.circuit_breaker = upstream.circuit_breaker.clone();
        Ok(client)
    }

    /// Retry failed requests up to `max_retries` times, `delay_ms` apart
    pub fn retry(mut self, max_retries: u32, delay_ms: u64) -> Self {
        self.retry = Some(RetryConfig::new(max_retries, delay_ms));
        self
    }

    /// Guard requests with the registry's breaker for this target.
    ///
    /// `config` is applied to the shared breaker when it is first bound,
    /// overwriting thresholds other clients may have set.
    pub fn circuit_break(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self.breaker = OnceCell::new();
        self
    }

    /// Registry key of the target
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    pub fn retry_config(&self) -> Option<&RetryConfig> {
        self.retry.as_ref()
    }

    pub fn circuit_breaker_config(&self) -> Option<&CircuitBreakerConfig> {
        self.circuit_breaker.as_ref()
    }

    /// The shared breaker for this target, binding it on first use.
    /// `None` when circuit breaking is not configured.
    pub async fn breaker(&self) -> Option<Arc<CircuitBreaker>> {
        let config = self.circuit_breaker.as_ref()?;
        let breaker = self
            .breaker
            .get_or_init(|| async {
                let breaker = self.registry.get_or_create(&self.key, config.clone());
                breaker.set_config(config.clone()).await;
                debug!(upstream = %self.key, "Bound circuit breaker");
                breaker
            })
            .await;
        Some(breaker.clone())
    }

    /// Ordered policy stages: breaker innermost, retry outermost
    async fn stages(&self) -> Vec<Stage> {
        let breaker = self.breaker().await;
        let mut stages = Vec::with_capacity(2);

        if let Some(breaker) = &breaker {
            stages.push(Stage::CircuitBreaker(breaker.clone()));
        }
        if let Some(retry) = &self.retry {
            stages.push(Stage::Retry {
                policy: RetryPolicy::new(retry.clone()),
                breaker,
            });
        }

        stages
    }

    /// Run an arbitrary operation under this client's policies
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let raw: BoxOperation<T> = Arc::new(operation);
        let wrapped = compose(raw, self.stages().await);
        wrapped.invoke().await
    }

    /// Send a request to the target under this client's policies
    pub async fn request(&self, spec: RequestSpec) -> Result<HttpResponse> {
        let url = spec.url(&self.base_url)?;
        let method = spec.method.to_string();
        let timer = Timer::new(self.key.clone(), method.clone());

        debug!(upstream = %self.key, method = %method, url = %url, "Sending request");

        let http = self.http.clone();
        let spec = Arc::new(spec);
        let request_url = url.clone();
        let result = self
            .execute(move || {
                let http = http.clone();
                let url = request_url.clone();
                let spec = spec.clone();
                async move { request::send_request(&http, url, &spec).await }
            })
            .await;

        match &result {
            Ok(response) => {
                info!(
                    upstream = %self.key,
                    method = %method,
                    url = %url,
                    status = %response.status,
                    latency_ms = timer.elapsed() * 1000.0,
                    "Request completed"
                );
                timer.record("success");
            }
            Err(e) => {
                warn!(
                    upstream = %self.key,
                    method = %method,
                    url = %url,
                    error = %e,
                    latency_ms = timer.elapsed() * 1000.0,
                    "Request failed"
                );
                timer.record(if e.is_circuit_open() { "rejected" } else { "error" });
            }
        }

        result
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.request(RequestSpec::get(path)).await
    }

    pub async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpResponse> {
        self.request(RequestSpec::post(path).json(body)?).await
    }
}

fn build_http_client(timeout: Duration, headers: HeaderMap) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| ClientError::Internal(format!("Failed to create HTTP client: {}", e)))
}
