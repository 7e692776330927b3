use axum::body::Body;
use http::{Request, StatusCode};
use resilient_http::circuit_breaker::{BreakerRegistry, CircuitBreakerConfig, CircuitState};
use resilient_http::config::{ResilienceConfig, UpstreamConfig};
use resilient_http::server::{build_app, AppState};
use resilient_http::{ClientError, RequestSpec, ResilientClient};
use std::time::{Duration, Instant};
use tower::ServiceExt;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn test_successful_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ws/01001000/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cep": "01001-000",
            "localidade": "São Paulo"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let base_url = format!("{}/ws", mock_server.uri());
    let client = ResilientClient::new(&base_url, BreakerRegistry::new())
        .unwrap()
        .retry(3, 10)
        .circuit_break(CircuitBreakerConfig::new(3, 2, 1000));

    let response = client.get("/01001000/json").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["cep"], "01001-000");
}

#[tokio::test]
async fn test_retry_exhaustion_returns_upstream_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/503"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(4)
        .mount(&mock_server)
        .await;

    let client = ResilientClient::new(&mock_server.uri(), BreakerRegistry::new())
        .unwrap()
        .retry(3, 100);

    let start = Instant::now();
    let result = client.get("/503").await;
    let elapsed = start.elapsed();

    match result {
        Err(ClientError::Status { status, body, .. }) => {
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body, "unavailable");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(request_count(&mock_server).await, 4);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_breaker_trip_stops_retries() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let registry = BreakerRegistry::new();
    let client = ResilientClient::new(&mock_server.uri(), registry.clone())
        .unwrap()
        .circuit_break(CircuitBreakerConfig::new(3, 2, 60_000))
        .retry(10, 10);

    let result = client.get("/down").await;
    assert!(matches!(result, Err(ClientError::CircuitOpen(_))));
    assert_eq!(request_count(&mock_server).await, 3);
    assert_eq!(registry.state(client.key()).await, CircuitState::Open);

    // Further calls fail fast without reaching the upstream
    let result = client.get("/down").await;
    assert!(matches!(result, Err(ClientError::CircuitOpen(_))));
    assert_eq!(request_count(&mock_server).await, 3);
}

#[tokio::test]
async fn test_recovery_after_cool_down() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("back"))
        .mount(&mock_server)
        .await;

    let client = ResilientClient::new(&mock_server.uri(), BreakerRegistry::new())
        .unwrap()
        .circuit_break(CircuitBreakerConfig::new(2, 2, 200));

    assert!(client.get("/flaky").await.is_err());
    assert!(client.get("/flaky").await.is_err());
    assert!(matches!(
        client.get("/flaky").await,
        Err(ClientError::CircuitOpen(_))
    ));

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(client.get("/flaky").await.unwrap().text(), "back");
    assert_eq!(client.get("/flaky").await.unwrap().text(), "back");

    let breaker = client.breaker().await.unwrap();
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_request_spec_is_forwarded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .and(query_param("notify", "true"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({ "name": "Charlie" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 456,
            "name": "Charlie"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = ResilientClient::new(&mock_server.uri(), BreakerRegistry::new()).unwrap();
    let spec = RequestSpec::post("/api/users")
        .query("notify", "true")
        .json(&serde_json::json!({ "name": "Charlie" }))
        .unwrap();

    let response = client.request(spec).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["id"], 456);
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let mut upstream = UpstreamConfig::new("slow", mock_server.uri());
    upstream.timeout_ms = 50;
    upstream.circuit_breaker = Some(CircuitBreakerConfig::new(1, 1, 60_000));

    let client = ResilientClient::from_upstream(&upstream, BreakerRegistry::new()).unwrap();

    assert!(matches!(
        client.get("/slow").await,
        Err(ClientError::Timeout(_))
    ));
    assert!(matches!(
        client.get("/slow").await,
        Err(ClientError::CircuitOpen(_))
    ));
}

fn demo_config(base_url: &str) -> ResilienceConfig {
    let yaml = format!(
        r#"
upstreams:
  - name: users
    base_url: "{base}"
    retry:
      max_retries: 1
      delay_ms: 10
    circuit_breaker:
      failure_threshold: 2
      success_threshold: 1
      timeout_ms: 60000
"#,
        base = base_url
    );
    ResilienceConfig::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn test_server_forwards_to_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "users": ["Alice", "Bob"]
        })))
        .mount(&mock_server)
        .await;

    let state = AppState::from_config(&demo_config(&mock_server.uri()), BreakerRegistry::new())
        .unwrap();
    let app = build_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/upstreams/users/api/users?page=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body_str = String::from_utf8(body.to_vec()).unwrap();
    assert!(body_str.contains("Alice"));
    assert!(body_str.contains("Bob"));
}

#[tokio::test]
async fn test_server_reports_open_breaker() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let state = AppState::from_config(&demo_config(&mock_server.uri()), BreakerRegistry::new())
        .unwrap();
    let app = build_app(state);

    // Two attempts (one retry) trip the breaker, the upstream error surfaces
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/upstreams/users/broken")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // Subsequent requests are refused locally
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/upstreams/users/broken")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/breakers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let breakers: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(breakers[0]["state"], "Open");
    assert_eq!(breakers[0]["metrics"]["failed_requests"], 2);
    assert_eq!(request_count(&mock_server).await, 2);
}

#[tokio::test]
async fn test_server_unknown_upstream() {
    let state = AppState::from_config(&demo_config("http://localhost:1"), BreakerRegistry::new())
        .unwrap();
    let app = build_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/upstreams/missing/anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
