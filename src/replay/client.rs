//! Outbound HTTP client used to re-issue stored requests

use std::time::Duration;

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, StatusCode};
use tracing::{debug, warn};

use crate::{HookError, Result};

/// Fully resolved request ready to be sent
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URL
    pub url: String,
    /// Headers in send order; names may repeat
    pub headers: Vec<(String, Bytes)>,
    /// Body bytes, sent unchanged
    pub body: Bytes,
}

/// HTTP client with a fixed per-request timeout
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client whose calls give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialised
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| HookError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    /// Send `request` and return the response status
    ///
    /// The response body is not read.
    ///
    /// # Errors
    ///
    /// Returns `ReplayBuild` for malformed stored data and `ReplayTransport`
    /// when the call fails or times out
    pub async fn send(&self, request: &OutboundRequest) -> Result<StatusCode> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .body(request.body.clone());

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HookError::ReplayBuild(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| HookError::ReplayBuild(format!("header {name}: {e}")))?;
            builder = builder.header(name, value);
        }

        let outbound = builder
            .build()
            .map_err(|e| HookError::ReplayBuild(e.to_string()))?;

        debug!("Replaying {} {}", request.method, request.url);

        let response = self.client.execute(outbound).await.map_err(|e| {
            warn!("Replay of {} {} failed: {}", request.method, request.url, e);
            if e.is_timeout() {
                HookError::ReplayTransport(format!("timed out after {:?}", self.timeout))
            } else {
                HookError::ReplayTransport(e.to_string())
            }
        })?;

        Ok(response.status())
    }

    /// Configured timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
