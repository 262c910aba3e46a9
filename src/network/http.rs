//! HTTP response helpers and request accessors

use std::convert::Infallible;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, COOKIE};
use hyper::{HeaderMap, Response, StatusCode, Uri};
use serde::Serialize;

use crate::{HookError, Result};

/// Body type of every response the server produces
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Body holding `data`
#[must_use]
pub fn full(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into()).boxed_unsync()
}

/// Empty body
#[must_use]
pub fn empty() -> ResponseBody {
    Empty::new().boxed_unsync()
}

/// Plain-text response
#[must_use]
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<ResponseBody> {
    with_content_type(status, full(body), TEXT_PLAIN)
}

/// Response with no body
#[must_use]
pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = status;
    response
}

/// JSON response; falls back to a 500 if `value` cannot be serialized
#[must_use]
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(body) => with_content_type(status, full(body), APPLICATION_JSON),
        Err(e) => text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode response: {e}"),
        ),
    }
}

/// Plain-text response describing `error`, with its status
#[must_use]
pub fn error_response(error: &HookError) -> Response<ResponseBody> {
    text(error.status(), error.to_string())
}

fn with_content_type(
    status: StatusCode,
    body: ResponseBody,
    content_type: &'static str,
) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// First value of query parameter `name`, percent-decoded
#[must_use]
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if decode_component(key) == name {
            Some(decode_component(value))
        } else {
            None
        }
    })
}

/// Query parameter parsed as `usize`, `None` when absent
///
/// # Errors
///
/// Returns `InvalidParameter` if present but not a number
pub fn query_usize(uri: &Uri, name: &'static str) -> Result<Option<usize>> {
    match query_param(uri, name) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| HookError::InvalidParameter { name, value: raw }),
    }
}

/// Value of cookie `name`, if sent and non-empty
#[must_use]
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Header set by TLS-terminating proxies
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Whether the first `X-Forwarded-Proto` value is `https`
#[must_use]
pub fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw).map_or(raw.clone(), |decoded| decoded.into_owned())
}
