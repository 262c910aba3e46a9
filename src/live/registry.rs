//! Per-endpoint set of live subscribers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::queue::{event_queue, EventReceiver, EventSender, Frame};

/// Identifier of one subscription, unique for the registry's lifetime
pub type SubscriberId = u64;

/// Wire transport of a live viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// WebSocket JSON envelope
    WebSocket,
    /// `text/event-stream` frames
    Sse,
}

/// Registry-side handle of one subscription
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    transport: Transport,
    sender: EventSender,
}

impl Subscriber {
    /// Subscription identifier
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Transport this subscriber expects frames for
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Queue side used for delivery
    #[must_use]
    pub fn sender(&self) -> &EventSender {
        &self.sender
    }
}

/// Concurrent map of endpoint id to its subscribers
///
/// Every operation takes the shard lock for one endpoint key, so a snapshot
/// never observes a half-applied subscribe or unsubscribe.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    endpoints: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SubscriptionRegistry {
    /// Create a registry whose subscriber queues hold `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            endpoints: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber for `endpoint_id`
    pub fn subscribe(self: &Arc<Self>, endpoint_id: &str, transport: Transport) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = event_queue(self.capacity);

        self.endpoints
            .entry(endpoint_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                transport,
                sender,
            });

        debug!("Subscriber {} ({:?}) joined {}", id, transport, endpoint_id);

        Subscription {
            id,
            endpoint_id: endpoint_id.to_string(),
            transport,
            receiver,
            registry: Arc::clone(self),
        }
    }

    /// Remove one subscriber; returns whether it was present
    pub fn unsubscribe(&self, endpoint_id: &str, id: SubscriberId) -> bool {
        let removed = match self.endpoints.get_mut(endpoint_id) {
            Some(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|s| s.id != id);
                subscribers.len() != before
            }
            None => false,
        };

        self.endpoints
            .remove_if(endpoint_id, |_, subscribers| subscribers.is_empty());

        if removed {
            debug!("Subscriber {} left {}", id, endpoint_id);
        }
        removed
    }

    /// Copy of the current subscribers of `endpoint_id`, in join order
    #[must_use]
    pub fn snapshot(&self, endpoint_id: &str) -> Vec<Subscriber> {
        self.endpoints
            .get(endpoint_id)
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default()
    }

    /// Disconnect every subscriber of `endpoint_id`; returns how many there were
    ///
    /// Dropping the registry's senders ends each viewer's stream.
    pub fn close_all(&self, endpoint_id: &str) -> usize {
        let closed = self
            .endpoints
            .remove(endpoint_id)
            .map_or(0, |(_, subscribers)| subscribers.len());

        if closed > 0 {
            debug!("Closed {} subscribers of {}", closed, endpoint_id);
        }
        closed
    }

    /// Disconnect every subscriber of every endpoint
    pub fn close_everything(&self) -> usize {
        let keys: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        keys.iter().map(|key| self.close_all(key)).sum()
    }

    /// Number of subscribers registered for `endpoint_id`
    #[must_use]
    pub fn subscriber_count(&self, endpoint_id: &str) -> usize {
        self.endpoints.get(endpoint_id).map_or(0, |s| s.len())
    }

    /// Number of endpoints with at least one subscriber
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Register a subscriber whose receiving side is already gone
    #[cfg(test)]
    pub(crate) fn register_orphan(&self, endpoint_id: &str, transport: Transport) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, _receiver) = event_queue(self.capacity);
        self.endpoints
            .entry(endpoint_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                transport,
                sender,
            });
        id
    }
}

/// Viewer-side handle; unsubscribes when dropped
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    endpoint_id: String,
    transport: Transport,
    receiver: EventReceiver,
    registry: Arc<SubscriptionRegistry>,
}

impl Subscription {
    /// Wait for the next frame; `None` once the subscription is closed
    pub async fn next(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Subscription identifier
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Endpoint this subscription follows
    #[must_use]
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Transport of this subscription
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Frames dropped because this viewer fell behind
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.receiver.dropped()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.endpoint_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::queue::Offer;

    fn registry() -> Arc<SubscriptionRegistry> {
        Arc::new(SubscriptionRegistry::new(4))
    }

    #[test]
    fn test_subscribe_and_snapshot() {
        let registry = registry();
        let a = registry.subscribe("e1", Transport::WebSocket);
        let b = registry.subscribe("e1", Transport::Sse);
        let _other = registry.subscribe("e2", Transport::Sse);

        let ids: Vec<SubscriberId> = registry.snapshot("e1").iter().map(Subscriber::id).collect();
        assert_eq!(ids, [a.id(), b.id()]);
        assert_eq!(registry.subscriber_count("e2"), 1);
        assert!(registry.snapshot("missing").is_empty());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = registry();
        let sub = registry.subscribe("e1", Transport::Sse);
        let id = sub.id();

        assert!(registry.unsubscribe("e1", id));
        assert!(!registry.unsubscribe("e1", id));
        assert!(!registry.unsubscribe("nope", 999));
        assert_eq!(registry.endpoint_count(), 0);

        // Drop runs unsubscribe a third time
        drop(sub);
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = registry();
        let a = registry.subscribe("e1", Transport::Sse);
        let b = registry.subscribe("e1", Transport::Sse);
        drop(a);

        let remaining = registry.snapshot("e1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), b.id());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = registry();
        let a = registry.subscribe("e1", Transport::Sse);
        let snapshot = registry.snapshot("e1");
        drop(a);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.subscriber_count("e1"), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let registry = registry();
        let mut a = registry.subscribe("e1", Transport::WebSocket);
        let mut b = registry.subscribe("e1", Transport::Sse);
        let keep = registry.subscribe("e2", Transport::Sse);

        assert_eq!(registry.close_all("e1"), 2);
        assert!(a.next().await.is_none());
        assert!(b.next().await.is_none());
        assert_eq!(registry.subscriber_count("e2"), 1);
        assert_eq!(registry.close_all("e1"), 0);
        drop(keep);
    }

    #[tokio::test]
    async fn test_close_everything() {
        let registry = registry();
        let mut a = registry.subscribe("e1", Transport::Sse);
        let mut b = registry.subscribe("e2", Transport::Sse);

        assert_eq!(registry.close_everything(), 2);
        assert!(a.next().await.is_none());
        assert!(b.next().await.is_none());
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[test]
    fn test_concurrent_subscribe_unsubscribe() {
        let registry = registry();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let sub = registry.subscribe("hot", Transport::Sse);
                        let _ = registry.snapshot("hot");
                        drop(sub);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.subscriber_count("hot"), 0);
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[test]
    fn test_closed_subscription_reports_disconnected() {
        let registry = registry();
        let sub = registry.subscribe("e1", Transport::Sse);
        let snapshot = registry.snapshot("e1");
        drop(sub);

        assert_eq!(snapshot[0].sender().offer(Arc::from("x")), Offer::Disconnected);
    }
}
