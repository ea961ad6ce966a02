//! Remote transport: one synchronous HTTP-like request/response.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// An outgoing request built by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response. `body` is the decoded JSON, or the raw text as a string.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub ok: bool,
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self {
            ok: true,
            status: 200,
            body,
        }
    }

    #[must_use]
    pub fn status(status: u16, body: Value) -> Self {
        Self {
            ok: (200..300).contains(&status),
            status,
            body,
        }
    }
}

/// The request never produced a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends requests to the remote system.
pub trait RemoteTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransportError` when no response was received.
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Request timeout of the HTTP transport.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed transport driven on a private tokio runtime.
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns `TransportError` if the runtime or client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError(format!("Failed to create tokio runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, runtime })
    }

    async fn send_async(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError(format!("Invalid method {}: {e}", request.method)))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| TransportError(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError(format!("Failed to read response: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(TransportResponse::status(status, body))
    }
}

impl RemoteTransport for HttpTransport {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.runtime.block_on(self.send_async(request))
    }
}
