//! Demo HTTP server forwarding requests to configured upstreams through
//! [`ResilientClient`]s that share one breaker registry.

use crate::circuit_breaker::{BreakerRegistry, CircuitBreakerMetrics, CircuitState};
use crate::client::{RequestSpec, ResilientClient};
use crate::config::ResilienceConfig;
use crate::error::{ClientError, Result};
use crate::metrics::MetricsService;
use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<HashMap<String, Arc<ResilientClient>>>,
    pub registry: BreakerRegistry,
    pub metrics: Option<MetricsService>,
}

impl AppState {
    /// Build one client per configured upstream, all sharing `registry`
    pub fn from_config(config: &ResilienceConfig, registry: BreakerRegistry) -> Result<Self> {
        let mut clients = HashMap::new();
        for upstream in &config.upstreams {
            let client = ResilientClient::from_upstream(upstream, registry.clone())?;
            debug!(
                name = %upstream.name,
                base_url = %upstream.base_url,
                retry = upstream.retry.is_some(),
                circuit_breaker = upstream.circuit_breaker.is_some(),
                "Configured upstream"
            );
            clients.insert(upstream.name.clone(), Arc::new(client));
        }

        Ok(Self {
            clients: Arc::new(clients),
            registry,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Breaker snapshot returned by `/breakers`
#[derive(Debug, Serialize)]
pub struct BreakerStatus {
    pub target: String,
    pub state: CircuitState,
    pub metrics: CircuitBreakerMetrics,
}

/// Build the router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/breakers", get(breakers_handler))
        .route("/metrics", get(metrics_handler))
        .route("/upstreams/:name/*path", get(forward_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Initialize and run the demo server
pub async fn init_server(config: ResilienceConfig) -> Result<()> {
    config.validate()?;

    info!("Starting resilient HTTP demo server");

    let registry = BreakerRegistry::new();
    let mut state = AppState::from_config(&config, registry)?;
    match MetricsService::new() {
        Ok(metrics) => state = state.with_metrics(metrics),
        Err(e) => warn!(error = %e, "Metrics disabled"),
    }
    info!("Loaded {} upstreams", state.clients.len());

    let app = build_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| ClientError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn breakers_handler(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    let mut statuses: Vec<BreakerStatus> = state
        .registry
        .all_metrics()
        .await
        .into_iter()
        .map(|(target, metrics, state)| BreakerStatus {
            target,
            state,
            metrics,
        })
        .collect();
    statuses.sort_by(|a, b| a.target.cmp(&b.target));
    Json(statuses)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics disabled".to_string(),
        ),
    }
}

/// Forward `GET /upstreams/{name}/{path}` to the named upstream
async fn forward_handler(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response<Body>> {
    let client = state
        .clients
        .get(&name)
        .ok_or_else(|| ClientError::UnknownUpstream(name.clone()))?;

    let mut spec = RequestSpec::get(path);
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            spec = spec.query(key, value);
        }
    }

    let upstream_response = client.request(spec).await?;

    let mut builder = Response::builder().status(upstream_response.status);
    if let Some(content_type) = upstream_response.headers.get(header::CONTENT_TYPE) {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }

    builder
        .body(Body::from(upstream_response.body))
        .map_err(|e| ClientError::Internal(format!("Failed to build response: {}", e)))
}
