//! Endpoint and captured-request records

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::capture::classify::{self, BodyKind};

/// Identifier assigned to a captured request when it is persisted
pub type RequestId = i64;

/// Path prefix under which endpoints receive traffic
pub const CAPTURE_PREFIX: &str = "/h/";

/// A capture target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Opaque unique identifier
    pub id: String,
    /// Optional human alias
    pub alias: Option<String>,
    /// Creator identity used for ownership scoping
    #[serde(skip_serializing)]
    pub creator_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
}

impl Endpoint {
    /// Create an endpoint that expires `ttl` from now
    #[must_use]
    pub fn new(id: &str, alias: Option<&str>, creator_id: Option<&str>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id: id.to_string(),
            alias: alias.filter(|a| !a.is_empty()).map(str::to_string),
            creator_id: creator_id.filter(|c| !c.is_empty()).map(str::to_string),
            created_at,
            expires_at,
        }
    }

    /// Whether the endpoint has expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Path senders use to reach this endpoint
    #[must_use]
    pub fn capture_path(&self) -> String {
        capture_path(&self.id)
    }
}

/// Capture path for an endpoint identifier
#[must_use]
pub fn capture_path(endpoint_id: &str) -> String {
    format!("{CAPTURE_PREFIX}{endpoint_id}")
}

/// Ordered multi-valued header collection
///
/// Names keep the spelling they arrived with; lookups are case-insensitive.
/// Values are the bytes as received, which need not be UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, Vec<Bytes>)>,
}

impl HeaderList {
    /// Create an empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every name/value pair of an inbound header map, in arrival order
    #[must_use]
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut list = Self::new();
        for (name, value) in headers {
            list.append(name.as_str(), Bytes::copy_from_slice(value.as_bytes()));
        }
        list
    }

    /// Append a value, grouping it under an existing entry with the same name
    pub fn append(&mut self, name: &str, value: impl Into<Bytes>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name.to_string(), vec![value])),
        }
    }

    /// All values recorded for `name`
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[Bytes] {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value recorded for `name`, if it is valid UTF-8
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .first()
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Iterate over `(name, values)` entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Bytes])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no headers were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (name, value) in iter {
            list.append(&name, value);
        }
        list
    }
}

/// Serialized as `{name: [value, ...]}`; non-UTF-8 bytes are shown as U+FFFD
impl Serialize for HeaderList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            let shown: Vec<Cow<'_, str>> = values.iter().map(|v| String::from_utf8_lossy(v)).collect();
            map.serialize_entry(name, &shown)?;
        }
        map.end()
    }
}

/// Canonical record of one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    /// Assigned by the store; zero until persisted
    pub id: RequestId,
    /// Owning endpoint
    pub endpoint_id: String,
    /// HTTP method
    pub method: String,
    /// Request path as received, including the capture prefix
    pub path: String,
    /// Raw query string, when one was sent
    pub query: Option<String>,
    /// Remote peer address
    pub remote_addr: String,
    /// Inbound headers
    pub headers: HeaderList,
    /// Body bytes, decompressed when decompression succeeded
    pub body: Bytes,
    /// Status recorded for bookkeeping
    pub status_code: u16,
    /// Set by the store at persistence time
    pub created_at: DateTime<Utc>,
}

impl CapturedRequest {
    /// MIME essence of the declared content type (`text/plain` when absent)
    #[must_use]
    pub fn content_type(&self) -> String {
        classify::mime_essence(self.headers.get("content-type"))
    }

    /// Text/binary classification of the body, computed on read
    #[must_use]
    pub fn body_kind(&self) -> BodyKind {
        classify::classify(&self.body, &self.content_type())
    }

    /// Path plus query, as the sender addressed it
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.query.as_deref() {
            Some(q) if !q.is_empty() => format!("{}?{q}", self.path),
            _ => self.path.clone(),
        }
    }
}
