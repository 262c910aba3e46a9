use std::error::Error as StdError;
use std::net::SocketAddr;

use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error};

use super::App;
use crate::network::http::text;
use crate::network::ResponseBody;
use crate::Result;

impl App {
    /// Normalize, persist and broadcast one inbound request
    pub(super) async fn capture<B>(
        &self,
        endpoint_id: &str,
        request: Request<B>,
        peer: SocketAddr,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        // Unknown endpoints are rejected before the body is read
        self.live_endpoint(endpoint_id)?;

        let record = self.normalizer.normalize(endpoint_id, request, peer).await?;
        let stored = self.store.save_request(record).map_err(|e| {
            error!("Failed to save request for {}: {}", endpoint_id, e);
            e
        })?;

        let report = self.broadcaster.publish(endpoint_id, &stored);
        debug!(
            "Request {} on {}: delivered={} dropped={} removed={}",
            stored.id, endpoint_id, report.delivered, report.dropped, report.removed
        );

        Ok(text(StatusCode::OK, "ok"))
    }
}
