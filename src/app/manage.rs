//! Endpoint and captured-request management

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use hyper::body::Body;
use hyper::header::{HeaderValue, SET_COOKIE};
use hyper::{Request, Response, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::App;
use crate::capture::read_body;
use crate::network::http::{cookie, empty_response, forwarded_https, json, query_usize};
use crate::network::ResponseBody;
use crate::record::{CapturedRequest, Endpoint, HeaderList, RequestId};
use crate::{HookError, Result};

/// Cookie identifying the browser that created an endpoint
pub const BROWSER_ID_COOKIE: &str = "pipehook_browser_id";

const BROWSER_ID_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Optional body of `POST /endpoints`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateEndpoint {
    /// Human alias
    pub alias: Option<String>,
    /// Requested lifetime, clamped to the configured maximum
    pub ttl_secs: Option<u64>,
}

/// Endpoint as returned by the management API
#[derive(Debug, Serialize)]
pub struct EndpointView {
    /// Identifier
    pub id: String,
    /// Human alias
    pub alias: Option<String>,
    /// Path senders post to
    pub capture_path: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Requests captured so far
    pub request_count: usize,
}

impl EndpointView {
    fn new(endpoint: Endpoint, request_count: usize) -> Self {
        Self {
            capture_path: endpoint.capture_path(),
            id: endpoint.id,
            alias: endpoint.alias,
            created_at: endpoint.created_at,
            expires_at: endpoint.expires_at,
            request_count,
        }
    }
}

/// Captured request as returned by the management API
#[derive(Debug, Serialize)]
pub struct RequestView {
    /// Identifier
    pub id: RequestId,
    /// Owning endpoint
    pub endpoint_id: String,
    /// HTTP method
    pub method: String,
    /// Path as received
    pub path: String,
    /// Raw query string
    pub query: Option<String>,
    /// Sender address
    pub remote_addr: String,
    /// Inbound headers, every value kept
    pub headers: HeaderList,
    /// MIME essence of the declared content type
    pub content_type: String,
    /// Whether the body classifies as binary
    pub is_binary: bool,
    /// Stored body length
    pub body_size: usize,
    /// Body text; omitted for binary bodies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Status recorded at capture
    pub status_code: u16,
    /// Capture time
    pub created_at: DateTime<Utc>,
}

impl From<CapturedRequest> for RequestView {
    fn from(request: CapturedRequest) -> Self {
        let content_type = request.content_type();
        let is_binary = request.body_kind().is_binary();
        let body = (!is_binary).then(|| String::from_utf8_lossy(&request.body).into_owned());

        Self {
            id: request.id,
            body_size: request.body.len(),
            endpoint_id: request.endpoint_id,
            method: request.method,
            path: request.path,
            query: request.query,
            remote_addr: request.remote_addr,
            headers: request.headers,
            content_type,
            is_binary,
            body,
            status_code: request.status_code,
            created_at: request.created_at,
        }
    }
}

/// One page of an endpoint's requests, newest first
#[derive(Debug, Serialize)]
pub struct RequestPage {
    /// Endpoint
    pub endpoint_id: String,
    /// Requests captured in total
    pub total: usize,
    /// Page size applied
    pub limit: usize,
    /// Requests skipped
    pub offset: usize,
    /// Requests on this page
    pub requests: Vec<RequestView>,
}

impl App {
    pub(super) async fn create_endpoint<B>(
        &self,
        request: Request<B>,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let raw = read_body(body, self.config.limits.max_body_size).await?;
        let params: CreateEndpoint = if raw.iter().all(u8::is_ascii_whitespace) {
            CreateEndpoint::default()
        } else {
            serde_json::from_slice(&raw).map_err(|e| HookError::InvalidParameter {
                name: "endpoint parameters",
                value: e.to_string(),
            })?
        };

        let (creator_id, issued) = match cookie(&parts.headers, BROWSER_ID_COOKIE) {
            Some(id) => (id, false),
            None => (Uuid::new_v4().to_string(), true),
        };

        let id = Uuid::new_v4().to_string();
        let ttl = self.config.endpoint_ttl(params.ttl_secs);
        let endpoint =
            self.store
                .create_endpoint(&id, params.alias.as_deref(), Some(&creator_id), ttl)?;
        info!("Created endpoint {} (expires {})", endpoint.id, endpoint.expires_at);

        let mut response = json(StatusCode::CREATED, &EndpointView::new(endpoint, 0));
        if issued {
            let value = browser_id_cookie(&creator_id, forwarded_https(&parts.headers));
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(SET_COOKIE, value);
            }
        }
        Ok(response)
    }

    pub(super) fn list_endpoints<B>(&self, request: &Request<B>) -> Result<Response<ResponseBody>> {
        let limit = query_usize(request.uri(), "limit")?.unwrap_or(self.config.endpoints.list_limit);

        // Without a browser id there is nothing to scope the listing to
        let Some(creator_id) = cookie(request.headers(), BROWSER_ID_COOKIE) else {
            return Ok(json(StatusCode::OK, &Vec::<EndpointView>::new()));
        };

        let views = self
            .store
            .list_endpoints(Some(&creator_id), limit)?
            .into_iter()
            .map(|endpoint| {
                let count = self.store.count_requests(&endpoint.id)?;
                Ok(EndpointView::new(endpoint, count))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(json(StatusCode::OK, &views))
    }

    pub(super) fn endpoint_detail(&self, endpoint_id: &str) -> Result<Response<ResponseBody>> {
        let endpoint = self.live_endpoint(endpoint_id)?;
        let count = self.store.count_requests(endpoint_id)?;
        Ok(json(StatusCode::OK, &EndpointView::new(endpoint, count)))
    }

    /// Delete the endpoint with its requests, then close every live viewer
    pub(super) fn delete_endpoint(&self, endpoint_id: &str) -> Result<Response<ResponseBody>> {
        self.store.delete_endpoint(endpoint_id)?;
        let closed = self.registry.close_all(endpoint_id);
        info!("Deleted endpoint {} ({} viewers closed)", endpoint_id, closed);

        Ok(empty_response(StatusCode::OK))
    }

    pub(super) fn list_requests(&self, endpoint_id: &str, uri: &Uri) -> Result<Response<ResponseBody>> {
        self.live_endpoint(endpoint_id)?;

        let limit = query_usize(uri, "limit")?.unwrap_or(self.config.endpoints.list_limit);
        let offset = query_usize(uri, "offset")?.unwrap_or(0);
        let total = self.store.count_requests(endpoint_id)?;
        let requests = self
            .store
            .get_requests_with_offset(endpoint_id, limit, offset)?
            .into_iter()
            .map(RequestView::from)
            .collect();

        Ok(json(
            StatusCode::OK,
            &RequestPage {
                endpoint_id: endpoint_id.to_string(),
                total,
                limit,
                offset,
                requests,
            },
        ))
    }

    pub(super) fn request_detail(&self, request_id: RequestId) -> Result<Response<ResponseBody>> {
        let request = self.store.get_request(request_id)?;
        Ok(json(StatusCode::OK, &RequestView::from(request)))
    }

    pub(super) fn delete_request(&self, request_id: RequestId) -> Result<Response<ResponseBody>> {
        self.store.delete_request(request_id)?;
        debug!("Deleted request {}", request_id);
        Ok(empty_response(StatusCode::OK))
    }
}

fn browser_id_cookie(value: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{BROWSER_ID_COOKIE}={value}; Path=/; Max-Age={BROWSER_ID_MAX_AGE_SECS}; HttpOnly; SameSite=Lax"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
