//! In-memory store on sharded concurrent maps

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::Store;
use crate::record::{CapturedRequest, Endpoint, RequestId};
use crate::{HookError, Result};

/// Store that keeps everything in process memory
///
/// The per-endpoint id list doubles as the liveness marker for saves: a
/// request is only inserted while that entry's shard lock is held, so a
/// concurrent endpoint deletion can never leave an orphaned request.
#[derive(Debug)]
pub struct MemoryStore {
    endpoints: DashMap<String, Endpoint>,
    requests: DashMap<RequestId, CapturedRequest>,
    by_endpoint: DashMap<String, Vec<RequestId>>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            requests: DashMap::new(),
            by_endpoint: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Insert a fully formed endpoint
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the identifier is taken
    pub fn insert_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        match self.endpoints.entry(endpoint.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HookError::Storage(format!(
                "endpoint already exists: {}",
                endpoint.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                self.by_endpoint.insert(endpoint.id.clone(), Vec::new());
                slot.insert(endpoint);
                Ok(())
            }
        }
    }

    /// Remove an endpoint and return it with its requests, oldest first
    ///
    /// # Errors
    ///
    /// Returns `EndpointNotFound` if absent
    pub fn take_endpoint(&self, id: &str) -> Result<(Endpoint, Vec<CapturedRequest>)> {
        let ids = self.by_endpoint.remove(id).map(|(_, ids)| ids).unwrap_or_default();
        let requests = ids
            .iter()
            .filter_map(|rid| self.requests.remove(rid).map(|(_, r)| r))
            .collect();

        let (_, endpoint) = self
            .endpoints
            .remove(id)
            .ok_or_else(|| HookError::EndpointNotFound(id.to_string()))?;
        Ok((endpoint, requests))
    }

    /// Remove one request and return it
    ///
    /// # Errors
    ///
    /// Returns `RequestNotFound` if absent
    pub fn take_request(&self, id: RequestId) -> Result<CapturedRequest> {
        let (_, request) = self
            .requests
            .remove(&id)
            .ok_or(HookError::RequestNotFound(id))?;

        if let Some(mut ids) = self.by_endpoint.get_mut(&request.endpoint_id) {
            ids.retain(|rid| *rid != id);
        }
        Ok(request)
    }

    /// Put back a request with its existing id and timestamp
    ///
    /// # Errors
    ///
    /// Returns `EndpointNotFound` if the owning endpoint is gone
    pub fn restore_request(&self, request: CapturedRequest) -> Result<()> {
        let mut ids = self
            .by_endpoint
            .get_mut(&request.endpoint_id)
            .ok_or_else(|| HookError::EndpointNotFound(request.endpoint_id.clone()))?;

        self.next_id.fetch_max(request.id + 1, Ordering::SeqCst);
        let position = ids.partition_point(|rid| *rid < request.id);
        if ids.get(position) != Some(&request.id) {
            ids.insert(position, request.id);
        }
        self.requests.insert(request.id, request);
        Ok(())
    }

    /// Every endpoint, oldest first
    #[must_use]
    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.endpoints.iter().map(|e| e.value().clone()).collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        endpoints
    }

    /// Every request, in id order
    #[must_use]
    pub fn all_requests(&self) -> Vec<CapturedRequest> {
        let mut requests: Vec<CapturedRequest> =
            self.requests.iter().map(|r| r.value().clone()).collect();
        requests.sort_by_key(|r| r.id);
        requests
    }

    /// Ids of endpoints expired at `now`
    #[must_use]
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.key().clone())
            .collect()
    }
}

impl Store for MemoryStore {
    fn create_endpoint(
        &self,
        id: &str,
        alias: Option<&str>,
        creator_id: Option<&str>,
        ttl: Duration,
    ) -> Result<Endpoint> {
        let endpoint = Endpoint::new(id, alias, creator_id, ttl);
        self.insert_endpoint(endpoint.clone())?;
        Ok(endpoint)
    }

    fn get_endpoint(&self, id: &str) -> Result<Endpoint> {
        self.endpoints
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| HookError::EndpointNotFound(id.to_string()))
    }

    fn delete_endpoint(&self, id: &str) -> Result<()> {
        let (_, requests) = self.take_endpoint(id)?;
        debug!("Deleted endpoint {} with {} requests", id, requests.len());
        Ok(())
    }

    fn list_endpoints(&self, creator_id: Option<&str>, limit: usize) -> Result<Vec<Endpoint>> {
        let now = Utc::now();
        let mut endpoints: Vec<Endpoint> = self
            .endpoints
            .iter()
            .filter(|e| !e.is_expired_at(now))
            .filter(|e| creator_id.map_or(true, |c| e.creator_id.as_deref() == Some(c)))
            .map(|e| e.value().clone())
            .collect();

        endpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        endpoints.truncate(limit);
        Ok(endpoints)
    }

    fn save_request(&self, mut request: CapturedRequest) -> Result<CapturedRequest> {
        let mut ids = self
            .by_endpoint
            .get_mut(&request.endpoint_id)
            .ok_or_else(|| HookError::EndpointNotFound(request.endpoint_id.clone()))?;

        request.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        request.created_at = Utc::now();

        ids.push(request.id);
        self.requests.insert(request.id, request.clone());
        Ok(request)
    }

    fn get_request(&self, id: RequestId) -> Result<CapturedRequest> {
        self.requests
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(HookError::RequestNotFound(id))
    }

    fn get_requests_with_offset(
        &self,
        endpoint_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CapturedRequest>> {
        let ids: Vec<RequestId> = match self.by_endpoint.get(endpoint_id) {
            Some(ids) => ids.iter().rev().skip(offset).take(limit).copied().collect(),
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .filter_map(|id| self.requests.get(id).map(|r| r.value().clone()))
            .collect())
    }

    fn count_requests(&self, endpoint_id: &str) -> Result<usize> {
        Ok(self.by_endpoint.get(endpoint_id).map_or(0, |ids| ids.len()))
    }

    fn delete_request(&self, id: RequestId) -> Result<()> {
        self.take_request(id).map(|_| ())
    }

    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for id in self.expired_ids(now) {
            match self.take_endpoint(&id) {
                Ok(_) => removed.push(id),
                // Deleted concurrently
                Err(HookError::EndpointNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HeaderList;
    use bytes::Bytes;
    use std::sync::Arc;

    const DAY: Duration = Duration::from_secs(86_400);

    fn capture(endpoint_id: &str, body: &'static [u8]) -> CapturedRequest {
        CapturedRequest {
            id: 0,
            endpoint_id: endpoint_id.to_string(),
            method: "POST".to_string(),
            path: format!("/h/{endpoint_id}"),
            query: None,
            remote_addr: "127.0.0.1:1".to_string(),
            headers: HeaderList::new(),
            body: Bytes::from_static(body),
            status_code: 200,
            created_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    #[test]
    fn test_endpoint_crud() {
        let store = MemoryStore::new();
        let created = store.create_endpoint("e1", Some("ci"), Some("b1"), DAY).unwrap();
        assert_eq!(store.get_endpoint("e1").unwrap(), created);

        assert!(matches!(
            store.create_endpoint("e1", None, None, DAY),
            Err(HookError::Storage(_))
        ));

        store.delete_endpoint("e1").unwrap();
        assert!(matches!(store.get_endpoint("e1"), Err(HookError::EndpointNotFound(_))));
        assert!(matches!(store.delete_endpoint("e1"), Err(HookError::EndpointNotFound(_))));
    }

    #[test]
    fn test_save_assigns_ids_and_time() {
        let store = MemoryStore::new();
        store.create_endpoint("e1", None, None, DAY).unwrap();

        let first = store.save_request(capture("e1", b"one")).unwrap();
        let second = store.save_request(capture("e1", b"two")).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(first.created_at > DateTime::<Utc>::MIN_UTC);

        let loaded = store.get_request(2).unwrap();
        assert_eq!(&loaded.body[..], b"two");
    }

    #[test]
    fn test_save_requires_endpoint() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.save_request(capture("ghost", b"x")),
            Err(HookError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn test_paging_newest_first() {
        let store = MemoryStore::new();
        store.create_endpoint("e1", None, None, DAY).unwrap();
        store.create_endpoint("e2", None, None, DAY).unwrap();
        for _ in 0..5 {
            store.save_request(capture("e1", b"x")).unwrap();
        }
        store.save_request(capture("e2", b"y")).unwrap();

        let page: Vec<RequestId> = store
            .get_requests_with_offset("e1", 2, 1)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(page, [4, 3]);
        assert_eq!(store.count_requests("e1").unwrap(), 5);
        assert_eq!(store.count_requests("e2").unwrap(), 1);
        assert_eq!(store.count_requests("none").unwrap(), 0);
        assert!(store.get_requests_with_offset("none", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_delete_endpoint_cascades() {
        let store = MemoryStore::new();
        store.create_endpoint("e1", None, None, DAY).unwrap();
        let saved = store.save_request(capture("e1", b"x")).unwrap();

        store.delete_endpoint("e1").unwrap();
        assert!(matches!(
            store.get_request(saved.id),
            Err(HookError::RequestNotFound(_))
        ));
    }

    #[test]
    fn test_delete_request() {
        let store = MemoryStore::new();
        store.create_endpoint("e1", None, None, DAY).unwrap();
        let saved = store.save_request(capture("e1", b"x")).unwrap();

        store.delete_request(saved.id).unwrap();
        assert_eq!(store.count_requests("e1").unwrap(), 0);
        assert!(matches!(
            store.delete_request(saved.id),
            Err(HookError::RequestNotFound(_))
        ));
    }

    #[test]
    fn test_list_scoped_and_unexpired() {
        let store = MemoryStore::new();
        store.create_endpoint("a", None, Some("b1"), DAY).unwrap();
        store.create_endpoint("b", None, Some("b2"), DAY).unwrap();
        store.create_endpoint("c", None, Some("b1"), Duration::ZERO).unwrap();

        let mine: Vec<String> = store
            .list_endpoints(Some("b1"), 10)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(mine, ["a"]);
        assert_eq!(store.list_endpoints(None, 10).unwrap().len(), 2);
        assert_eq!(store.list_endpoints(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_expired() {
        let store = MemoryStore::new();
        store.create_endpoint("short", None, None, Duration::from_secs(1)).unwrap();
        store.create_endpoint("long", None, None, DAY).unwrap();
        store.save_request(capture("short", b"x")).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.cleanup_expired(later).unwrap(), ["short"]);
        assert!(store.get_endpoint("long").is_ok());
        assert_eq!(store.all_requests().len(), 0);
        assert!(store.cleanup_expired(later).unwrap().is_empty());
    }

    #[test]
    fn test_restore_keeps_ids() {
        let store = MemoryStore::new();
        store.create_endpoint("e1", None, None, DAY).unwrap();

        let mut old = capture("e1", b"x");
        old.id = 41;
        store.restore_request(old).unwrap();

        let next = store.save_request(capture("e1", b"y")).unwrap();
        assert_eq!(next.id, 42);
        assert_eq!(store.count_requests("e1").unwrap(), 2);
    }

    #[test]
    fn test_concurrent_save_and_delete() {
        let store = Arc::new(MemoryStore::new());
        store.create_endpoint("e1", None, None, DAY).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let _ = store.save_request(capture("e1", b"x"));
                }
            })
        };
        let deleter = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.delete_endpoint("e1"))
        };

        writer.join().unwrap();
        deleter.join().unwrap().unwrap();

        // Nothing outlives its endpoint
        assert!(store.all_requests().is_empty());
    }
}
