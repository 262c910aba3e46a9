use hyper::{Request, Response};
use tracing::{debug, warn};

use super::App;
use crate::live::{Subscription, Transport};
use crate::network::{sse, websocket, ResponseBody};
use crate::Result;

impl App {
    /// Upgrade to a WebSocket that follows `endpoint_id`
    ///
    /// The subscription is registered before the 101 is returned, so no
    /// capture arriving after the handshake is missed.
    pub(super) fn websocket<B>(
        &self,
        endpoint_id: &str,
        mut request: Request<B>,
    ) -> Result<Response<ResponseBody>> {
        self.live_endpoint(endpoint_id)?;
        let key = websocket::handshake_key(request.method(), request.headers())?;

        let subscription = self.follow(endpoint_id, Transport::WebSocket)?;
        let heartbeat = self.config.heartbeat();
        let shutdown = self.shutdown.listener();
        let on_upgrade = hyper::upgrade::on(&mut request);
        let endpoint_id = endpoint_id.to_string();

        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    debug!("WebSocket viewer attached to {}", endpoint_id);
                    let ws = websocket::server_stream(upgraded).await;
                    websocket::run_viewer(ws, subscription, heartbeat, shutdown).await;
                }
                Err(e) => warn!("WebSocket upgrade for {} failed: {}", endpoint_id, e),
            }
        });

        Ok(websocket::switching_protocols(&key))
    }

    /// Server-Sent Events stream that follows `endpoint_id`
    pub(super) fn sse(&self, endpoint_id: &str) -> Result<Response<ResponseBody>> {
        self.live_endpoint(endpoint_id)?;

        let subscription = self.follow(endpoint_id, Transport::Sse)?;
        debug!("SSE viewer attached to {}", endpoint_id);
        Ok(sse::open_stream(
            subscription,
            self.config.heartbeat(),
            self.shutdown.listener(),
        ))
    }

    /// Subscribe to a live endpoint
    ///
    /// Deletion removes the endpoint before closing its viewers, so the
    /// endpoint is looked up again once the subscription is registered.
    fn follow(&self, endpoint_id: &str, transport: Transport) -> Result<Subscription> {
        let subscription = self.registry.subscribe(endpoint_id, transport);
        self.live_endpoint(endpoint_id)?;
        Ok(subscription)
    }
}
