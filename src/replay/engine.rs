//! Replay engine: re-issues a stored request against its capture path

use std::time::Duration;

use bytes::Bytes;
use hyper::header::HOST;
use hyper::{HeaderMap, Method, StatusCode};
use tracing::info;

use crate::network::http::forwarded_https;
use crate::record::{capture_path, CapturedRequest, HeaderList};
use crate::{HookError, Result};

use super::client::{HttpClient, OutboundRequest};

/// Headers never forwarded on replay (lowercase)
pub const EXCLUDED_HEADERS: [&str; 4] = ["host", "content-length", "connection", "accept-encoding"];

/// Whether a stored header is forwarded on replay
#[must_use]
pub fn is_replayable_header(name: &str) -> bool {
    !EXCLUDED_HEADERS
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(name))
}

/// Flatten the replayable headers into name/value pairs, preserving order
#[must_use]
pub fn replayable_headers(headers: &HeaderList) -> Vec<(String, Bytes)> {
    headers
        .iter()
        .filter(|(name, _)| is_replayable_header(name))
        .flat_map(|(name, values)| values.iter().map(move |v| (name.to_string(), v.clone())))
        .collect()
}

/// Base URL (`scheme://authority`) of the server as the replay caller reached it
///
/// # Errors
///
/// Returns `MissingParameter` if neither a `Host` header nor a fallback host is available
pub fn infer_base_url(headers: &HeaderMap, tls: bool, fallback_host: Option<&str>) -> Result<String> {
    let scheme = if tls || forwarded_https(headers) {
        "https"
    } else {
        "http"
    };

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or(fallback_host)
        .ok_or(HookError::MissingParameter("host"))?;

    Ok(format!("{scheme}://{host}"))
}

/// Target URL for replaying `stored` through `base_url`
#[must_use]
pub fn build_target_url(base_url: &str, stored: &CapturedRequest) -> String {
    let prefix = capture_path(&stored.endpoint_id);
    let suffix = match stored.path.strip_prefix(&prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => stored.path.as_str(),
    };

    let mut url = format!("{}{prefix}{suffix}", base_url.trim_end_matches('/'));
    if let Some(query) = stored.query.as_deref().filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Result of a successful replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Status returned by the replayed call
    pub status: StatusCode,
}

impl ReplayOutcome {
    /// Status line, e.g. `200 OK`
    #[must_use]
    pub fn status_line(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {reason}", self.status.as_u16()),
            None => self.status.as_u16().to_string(),
        }
    }

    /// Message returned to the replay caller
    #[must_use]
    pub fn summary(&self) -> String {
        format!("Replayed successfully (Status: {})", self.status_line())
    }
}

/// Re-issues stored requests
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    client: HttpClient,
}

impl ReplayEngine {
    /// Create an engine whose outbound calls time out after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(timeout)?,
        })
    }

    /// Build the outbound request for `stored`
    ///
    /// # Errors
    ///
    /// Returns `ReplayBuild` if the stored method is not a valid HTTP method
    pub fn prepare(stored: &CapturedRequest, base_url: &str) -> Result<OutboundRequest> {
        let method = Method::from_bytes(stored.method.as_bytes())
            .map_err(|e| HookError::ReplayBuild(format!("method {:?}: {e}", stored.method)))?;

        Ok(OutboundRequest {
            method,
            url: build_target_url(base_url, stored),
            headers: replayable_headers(&stored.headers),
            body: stored.body.clone(),
        })
    }

    /// Replay `stored` through `base_url`
    ///
    /// The replayed call is neither persisted nor broadcast by this engine.
    ///
    /// # Errors
    ///
    /// Returns `ReplayBuild` for malformed stored data and `ReplayTransport` on call failure
    pub async fn replay(&self, stored: &CapturedRequest, base_url: &str) -> Result<ReplayOutcome> {
        let outbound = Self::prepare(stored, base_url)?;
        let status = self.client.send(&outbound).await?;

        info!(
            "Replayed request {} to {} ({})",
            stored.id, outbound.url, status
        );
        Ok(ReplayOutcome { status })
    }
}
