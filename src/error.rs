//! Error types for Pipehook

use std::io;

use hyper::StatusCode;
use thiserror::Error;

/// Result type for Pipehook operations
pub type Result<T> = std::result::Result<T, HookError>;

/// Errors that can occur in Pipehook
#[derive(Debug, Error)]
pub enum HookError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unknown (or expired) endpoint identifier
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// Unknown captured request identifier
    #[error("request not found: {0}")]
    RequestNotFound(i64),

    /// A required path or query parameter was absent
    #[error("missing {0}")]
    MissingParameter(&'static str),

    /// A parameter was present but could not be parsed
    #[error("invalid {name}: {value:?}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Raw value received
        value: String,
    },

    /// The inbound request body could not be read
    #[error("failed to read body: {0}")]
    BodyRead(String),

    /// Request body too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size (or the limit that was crossed while streaming)
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Too many request headers
    #[error("Too many headers: {count} exceeds limit of {limit}")]
    TooManyHeaders {
        /// Header count received
        count: usize,
        /// Configured limit
        limit: usize,
    },

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Journal entry failed its checksum
    #[error("Journal corrupted at offset {offset}: expected CRC {expected:#x}, got {actual:#x}")]
    CorruptedJournal {
        /// Offset of the entry header
        offset: u64,
        /// CRC32 stored in the entry header
        expected: u32,
        /// CRC32 computed over the payload
        actual: u32,
    },

    /// Journal bytes do not follow the expected layout
    #[error("Invalid journal format: {0}")]
    InvalidFormat(String),

    /// A live-view event could not be rendered
    #[error("failed to render event: {0}")]
    Render(String),

    /// The stored request could not be turned into an outbound request
    #[error("failed to create replay request: {0}")]
    ReplayBuild(String),

    /// The outbound replay call failed
    #[error("failed to replay request: {0}")]
    ReplayTransport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No route matches the request path
    #[error("not found: {0}")]
    RouteNotFound(String),

    /// The route exists but not for this method
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl HookError {
    /// HTTP status surfaced to the caller for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EndpointNotFound(_) | Self::RequestNotFound(_) | Self::RouteNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::MissingParameter(_) | Self::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            Self::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooManyHeaders { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is a not-found condition
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == StatusCode::NOT_FOUND
    }
}
