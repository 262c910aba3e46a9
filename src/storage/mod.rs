//! Persistence of endpoints and captured requests

mod codec;
mod format;
mod journal;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

pub use format::{
    EntryHeader, EntryKind, JournalHeader, ENTRY_HEADER_SIZE, JOURNAL_HEADER_SIZE, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
pub use journal::JournalStore;
pub use memory::MemoryStore;

use crate::config::{Backend, Config};
use crate::record::{CapturedRequest, Endpoint, RequestId};
use crate::{HookError, Result};

/// Blocking persistence contract used by the request handlers
///
/// Every call may fail with a not-found or an I/O error; callers do not retry.
pub trait Store: Send + Sync {
    /// Create an endpoint expiring `ttl` from now
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the identifier is taken
    fn create_endpoint(
        &self,
        id: &str,
        alias: Option<&str>,
        creator_id: Option<&str>,
        ttl: Duration,
    ) -> Result<Endpoint>;

    /// Look up an endpoint, expired or not
    ///
    /// # Errors
    ///
    /// Returns `EndpointNotFound` if absent
    fn get_endpoint(&self, id: &str) -> Result<Endpoint>;

    /// Delete an endpoint and all of its requests
    ///
    /// # Errors
    ///
    /// Returns `EndpointNotFound` if absent
    fn delete_endpoint(&self, id: &str) -> Result<()>;

    /// Unexpired endpoints, newest first, optionally scoped to a creator
    ///
    /// # Errors
    ///
    /// Returns error on storage failure
    fn list_endpoints(&self, creator_id: Option<&str>, limit: usize) -> Result<Vec<Endpoint>>;

    /// Persist a capture, assigning its id and creation time
    ///
    /// # Errors
    ///
    /// Returns `EndpointNotFound` if the owning endpoint is gone
    fn save_request(&self, request: CapturedRequest) -> Result<CapturedRequest>;

    /// Look up a captured request
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` if absent
    fn get_request(&self, id: RequestId) -> Result<CapturedRequest>;

    /// Page through an endpoint's requests, newest first
    ///
    /// # Errors
    ///
    /// Returns error on storage failure
    fn get_requests_with_offset(
        &self,
        endpoint_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CapturedRequest>>;

    /// Number of requests captured for an endpoint
    ///
    /// # Errors
    ///
    /// Returns error on storage failure
    fn count_requests(&self, endpoint_id: &str) -> Result<usize>;

    /// Delete one captured request
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` if absent
    fn delete_request(&self, id: RequestId) -> Result<()>;

    /// Delete every endpoint expired at `now` and return their ids
    ///
    /// # Errors
    ///
    /// Returns error on storage failure
    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Open the configured backend
///
/// # Errors
///
/// Returns error if the journal cannot be opened or recovered
pub fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.storage.backend {
        Backend::Memory => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        Backend::Journal => {
            let path = config.storage.path.as_deref().ok_or_else(|| {
                HookError::ConfigError("journal backend requires storage.path".to_string())
            })?;
            info!("Using journal storage at {:?}", path);
            Ok(Arc::new(JournalStore::open(path, config.storage.sync_writes)?))
        }
    }
}
