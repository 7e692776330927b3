use crate::error::{ClientError, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Description of a single request against a client's base URL
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    /// Path relative to the base URL
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overrides the client's per-request timeout
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type
    pub fn json<B: Serialize>(mut self, value: &B) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ClientError::Serialization(format!("Failed to encode body: {}", e)))?;
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve the full URL against `base`
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut url = join_path(base, &self.path)?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

/// Append `path` to the base URL, keeping any path the base already carries.
///
/// `https://viacep.com.br/ws` + `/01001000` yields `https://viacep.com.br/ws/01001000`.
/// A query string in `path` replaces the base query. Absolute URLs are
/// rejected: the breaker guarding this request is keyed by the base URL.
fn join_path(base: &Url, path: &str) -> Result<Url> {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    if path.contains("://") {
        return Err(ClientError::InvalidUrl(format!(
            "Request path must be relative to the base URL: {}",
            path
        )));
    }

    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    if let Some(query) = query {
        url.set_query(Some(query));
    }
    Ok(url)
}

/// Fully buffered upstream response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::Serialization(format!("Failed to decode body: {}", e)))
    }

    /// Body as UTF-8 text, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send one request. Non-2xx statuses are failures.
pub(crate) async fn send_request(
    client: &reqwest::Client,
    url: Url,
    spec: &RequestSpec,
) -> Result<HttpResponse> {
    let mut request = client
        .request(spec.method.clone(), url.clone())
        .headers(spec.headers.clone());

    if let Some(body) = &spec.body {
        request = request.body(body.clone());
    }
    if let Some(timeout) = spec.timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    if !status.is_success() {
        return Err(ClientError::Status {
            status,
            url: url.to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
