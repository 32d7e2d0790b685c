//! Buffered HTTP client for replayed and generated requests

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::{Result, RetraceError};

/// HTTP client that sends a fully buffered request and reads the whole
/// response body.
///
/// Every status code is returned as data; callers decide what a failure
/// means. Plain HTTP only.
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClient {
    /// Create a new HTTP client
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self { client }
    }

    /// Send one request and collect the response.
    ///
    /// # Errors
    ///
    /// Returns error if the URL or method is invalid, the connection
    /// fails, or the response body cannot be read
    pub async fn send(&self, request: &ClientRequest<'_>) -> Result<ClientResponse> {
        let uri = request
            .url
            .parse::<Uri>()
            .map_err(|e| RetraceError::Other(format!("Invalid URL '{}': {e}", request.url)))?;

        let method = request.method.parse::<Method>().map_err(|e| {
            RetraceError::Other(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        debug!("Sending {} {}", request.method, request.url);

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let http_request = builder
            .body(Full::new(Bytes::copy_from_slice(request.body)))
            .map_err(|e| RetraceError::Other(format!("Failed to build request: {e}")))?;

        let response = self
            .client
            .request(http_request)
            .await
            .map_err(|e| RetraceError::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RetraceError::Upstream(format!("Failed to read response body: {e}")))?
            .to_bytes();

        Ok(ClientResponse { status, body })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// One request to send
#[derive(Debug)]
pub struct ClientRequest<'a> {
    /// HTTP method
    pub method: &'a str,
    /// Absolute URL
    pub url: &'a str,
    /// Request headers
    pub headers: &'a [(String, String)],
    /// Request body
    pub body: &'a [u8],
}

/// A fully collected response
#[derive(Debug, Clone)]
pub struct ClientResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body bytes
    pub body: Bytes,
}

impl ClientResponse {
    /// Response body as text; invalid UTF-8 is replaced lossily
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Join a base URL and a captured path.
///
/// Captured URLs are already percent-encoded wire paths, so they are
/// appended verbatim.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:3001", "/api/users"),
            "http://localhost:3001/api/users"
        );
        assert_eq!(
            join_url("http://localhost:3001/", "/api/users"),
            "http://localhost:3001/api/users"
        );
        assert_eq!(
            join_url("http://localhost:3001", "api/users"),
            "http://localhost:3001/api/users"
        );
    }

    #[test]
    fn test_join_url_keeps_query() {
        assert_eq!(
            join_url("http://localhost:3001", "/items?page=2&q=a%20b"),
            "http://localhost:3001/items?page=2&q=a%20b"
        );
    }

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new();
        assert!(std::mem::size_of_val(&client) > 0);
    }
}
