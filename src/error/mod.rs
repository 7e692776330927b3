use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for resilient client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Circuit breaker is open for target: {0}")]
    CircuitOpen(String),

    #[error("Upstream {url} returned status {status}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown upstream: {0}")]
    UnknownUpstream(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether the breaker refused the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen(_))
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Breaker refusals and local configuration problems are final; everything
    /// the upstream or the transport produced is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Status { .. }
                | ClientError::Timeout(_)
                | ClientError::Connect(_)
                | ClientError::Request(_)
                | ClientError::Operation(_)
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClientError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClientError::Status { .. } => StatusCode::BAD_GATEWAY,
            ClientError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ClientError::Connect(_) => StatusCode::BAD_GATEWAY,
            ClientError::Request(_) => StatusCode::BAD_GATEWAY,
            ClientError::Operation(_) => StatusCode::BAD_GATEWAY,
            ClientError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ClientError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ClientError::UnknownUpstream(_) => StatusCode::NOT_FOUND,
            ClientError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ClientError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ClientError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout(e.to_string())
        } else if e.is_connect() {
            ClientError::Connect(e.to_string())
        } else {
            ClientError::Request(e.to_string())
        }
    }
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
