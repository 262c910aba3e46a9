//! Turns an inbound HTTP request into a `CapturedRequest`

use std::error::Error as StdError;
use std::io::Read;
use std::net::SocketAddr;

use bytes::Bytes;
use chrono::Utc;
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{HeaderMap, Request, StatusCode};
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::record::{CapturedRequest, HeaderList};
use crate::{HookError, Result};

use super::classify::mime_essence;

/// Content type whose data some intermediaries move into the query string
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Supported `Content-Encoding` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// gzip, possibly multi-member
    Gzip,
    /// zlib-wrapped deflate
    Deflate,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("gzip") {
            Some(Self::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }

    /// Decompress `raw`, stopping once the output exceeds `max_size`
    ///
    /// The returned buffer holds at most `max_size + 1` bytes, so a length
    /// above `max_size` means the stream was cut short.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid stream for this encoding
    pub fn decompress(self, raw: &[u8], max_size: usize) -> std::io::Result<Vec<u8>> {
        let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);
        let mut decoded = Vec::with_capacity(raw.len().saturating_mul(2).min(max_size));
        match self {
            Self::Gzip => MultiGzDecoder::new(raw).take(limit).read_to_end(&mut decoded)?,
            Self::Deflate => ZlibDecoder::new(raw).take(limit).read_to_end(&mut decoded)?,
        };
        Ok(decoded)
    }
}

/// Decompress `raw` when a supported encoding is declared, else return it unchanged
///
/// Decompression failure is not an error: the raw bytes are kept.
///
/// # Errors
///
/// Returns `DataTooLarge` if the decompressed body exceeds `max_size`
pub fn decode_body(content_encoding: Option<&str>, raw: Bytes, max_size: usize) -> Result<Bytes> {
    let Some(encoding) = content_encoding.and_then(ContentEncoding::from_header) else {
        return Ok(raw);
    };

    match encoding.decompress(&raw, max_size) {
        Ok(decoded) if decoded.len() > max_size => {
            warn!(
                "Rejecting {:?} body: {} bytes expand past the {} byte limit",
                encoding,
                raw.len(),
                max_size
            );
            Err(HookError::DataTooLarge {
                size: decoded.len(),
                limit: max_size,
            })
        }
        Ok(decoded) => {
            debug!(
                "Decompressed {:?} body: {} -> {} bytes",
                encoding,
                raw.len(),
                decoded.len()
            );
            Ok(Bytes::from(decoded))
        }
        Err(e) => {
            debug!("Keeping raw body, {:?} decompression failed: {}", encoding, e);
            Ok(raw)
        }
    }
}

/// Substitute the raw query string for an empty form-encoded body
///
/// Returns the body to store and whether the substitution happened.
#[must_use]
pub fn recover_form_body(body: Bytes, content_type: Option<&str>, query: Option<&str>) -> (Bytes, bool) {
    if !body.is_empty() || content_type.is_none() {
        return (body, false);
    }

    match query {
        Some(q) if !q.is_empty() && mime_essence(content_type) == FORM_CONTENT_TYPE => {
            (Bytes::copy_from_slice(q.as_bytes()), true)
        }
        _ => (body, false),
    }
}

/// Read a body to completion, enforcing `max_size`
///
/// # Errors
///
/// Returns `DataTooLarge` past the limit and `BodyRead` on transport failure
pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    match Limited::new(body, max_size).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(HookError::DataTooLarge {
            size: max_size.saturating_add(1),
            limit: max_size,
        }),
        Err(e) => Err(HookError::BodyRead(e.to_string())),
    }
}

/// Converts inbound requests into canonical records
#[derive(Debug, Clone)]
pub struct CaptureNormalizer {
    max_body_size: usize,
    max_headers: usize,
}

impl CaptureNormalizer {
    /// Create a normalizer with the configured limits
    #[must_use]
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_body_size: limits.max_body_size,
            max_headers: limits.max_headers,
        }
    }

    /// Check the request head against the limits without touching the body
    ///
    /// # Errors
    ///
    /// Returns error if there are too many headers or the declared length is too large
    pub fn validate_head(&self, headers: &HeaderMap) -> Result<()> {
        let count = headers.len();
        if count > self.max_headers {
            return Err(HookError::TooManyHeaders {
                count,
                limit: self.max_headers,
            });
        }

        if let Some(length) = declared_length(headers) {
            if length > self.max_body_size {
                return Err(HookError::DataTooLarge {
                    size: length,
                    limit: self.max_body_size,
                });
            }
        }

        Ok(())
    }

    /// Read and normalize one request for `endpoint_id`
    ///
    /// # Errors
    ///
    /// Returns error if the head exceeds limits, the body cannot be read, or
    /// the decompressed body is larger than the body limit
    pub async fn normalize<B>(
        &self,
        endpoint_id: &str,
        request: Request<B>,
        remote_addr: SocketAddr,
    ) -> Result<CapturedRequest>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        self.validate_head(&parts.headers)?;

        // Read even when the declared length is zero; some intermediaries omit it
        let raw = read_body(body, self.max_body_size).await?;

        let content_type = header_str(&parts.headers, CONTENT_TYPE.as_str());
        let query = parts.uri.query().filter(|q| !q.is_empty());
        let declared = declared_length(&parts.headers);

        if raw.is_empty() && declared.is_some_and(|len| len > 0) {
            warn!(
                "{} {}: Content-Length={} but captured 0 bytes, body stripped upstream?",
                parts.method,
                parts.uri.path(),
                declared.unwrap_or_default()
            );
        }

        let (body, recovered) = recover_form_body(raw, content_type, query);
        if recovered {
            debug!(
                "{} {}: form body recovered from query string ({} bytes)",
                parts.method,
                parts.uri.path(),
                body.len()
            );
        }

        let body = decode_body(
            header_str(&parts.headers, CONTENT_ENCODING.as_str()),
            body,
            self.max_body_size,
        )?;

        debug!(
            "Captured {} {} for {} ({} bytes)",
            parts.method,
            parts.uri.path(),
            endpoint_id,
            body.len()
        );

        Ok(CapturedRequest {
            id: 0,
            endpoint_id: endpoint_id.to_string(),
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            query: query.map(str::to_string),
            remote_addr: remote_addr.to_string(),
            headers: HeaderList::from_header_map(&parts.headers),
            body,
            status_code: StatusCode::OK.as_u16(),
            created_at: Utc::now(),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    header_str(headers, CONTENT_LENGTH.as_str()).and_then(|v| v.trim().parse().ok())
}
