//! Fan-out of capture events to live subscribers

use std::sync::Arc;

use tracing::{debug, warn};

use super::queue::{Frame, Offer};
use super::registry::{SubscriptionRegistry, Transport};
use super::render::{EventRenderer, HtmlEventRenderer};
use crate::record::CapturedRequest;

/// Per-publish delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Frames queued
    pub delivered: usize,
    /// Frames discarded on full queues
    pub dropped: usize,
    /// Subscribers removed because their receiver was gone
    pub removed: usize,
    /// Subscribers skipped because their transport failed to render
    pub render_failed: usize,
}

/// Memoized rendering for one transport within a single publish
enum Rendered {
    Pending,
    Ready(Frame),
    Failed,
}

/// Pushes capture events to every subscriber of an endpoint without waiting
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
    renderer: Arc<dyn EventRenderer>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Broadcaster {
    /// Broadcaster with the default HTML renderer
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self::with_renderer(registry, Arc::new(HtmlEventRenderer))
    }

    /// Broadcaster with a custom renderer
    #[must_use]
    pub fn with_renderer(registry: Arc<SubscriptionRegistry>, renderer: Arc<dyn EventRenderer>) -> Self {
        Self { registry, renderer }
    }

    /// Registry this broadcaster delivers through
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Deliver `record` to the current subscribers of `endpoint_id`
    ///
    /// Never waits on a subscriber. Each transport is rendered at most once.
    pub fn publish(&self, endpoint_id: &str, record: &CapturedRequest) -> PublishReport {
        let subscribers = self.registry.snapshot(endpoint_id);
        let mut report = PublishReport::default();
        if subscribers.is_empty() {
            return report;
        }

        let mut websocket = Rendered::Pending;
        let mut sse = Rendered::Pending;

        for subscriber in &subscribers {
            let slot = match subscriber.transport() {
                Transport::WebSocket => &mut websocket,
                Transport::Sse => &mut sse,
            };

            if matches!(slot, Rendered::Pending) {
                *slot = match self.renderer.render(subscriber.transport(), record) {
                    Ok(frame) => Rendered::Ready(frame),
                    Err(e) => {
                        warn!(
                            "Failed to render request {} for {:?} viewers: {}",
                            record.id,
                            subscriber.transport(),
                            e
                        );
                        Rendered::Failed
                    }
                };
            }

            let Rendered::Ready(frame) = slot else {
                report.render_failed += 1;
                continue;
            };

            match subscriber.sender().offer(Arc::clone(frame)) {
                Offer::Accepted => report.delivered += 1,
                Offer::Dropped => {
                    debug!(
                        "Viewer {} of {} is behind, dropped request {}",
                        subscriber.id(),
                        endpoint_id,
                        record.id
                    );
                    report.dropped += 1;
                }
                Offer::Disconnected => {
                    if self.registry.unsubscribe(endpoint_id, subscriber.id()) {
                        debug!("Removed disconnected viewer {} of {}", subscriber.id(), endpoint_id);
                    }
                    report.removed += 1;
                }
            }
        }

        report
    }
}
