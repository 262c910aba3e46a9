use hyper::header::HeaderValue;
use hyper::{HeaderMap, Response, StatusCode};
use tracing::warn;

use super::App;
use crate::network::http::text;
use crate::network::ResponseBody;
use crate::record::RequestId;
use crate::replay::infer_base_url;
use crate::Result;

/// Event name clients listen for after a replay
const REPLAYED_TRIGGER: &str = "requestReplayed";

impl App {
    /// Re-issue stored request `request_id` against its endpoint
    pub(super) async fn replay(
        &self,
        request_id: RequestId,
        headers: &HeaderMap,
    ) -> Result<Response<ResponseBody>> {
        let stored = self.store.get_request(request_id)?;
        // TLS is terminated upstream, so only X-Forwarded-Proto can signal https
        let base_url = infer_base_url(headers, false, self.config.public_host.as_deref())?;

        let outcome = self
            .replay
            .replay(&stored, &base_url)
            .await
            .map_err(|e| {
                warn!("Replay of request {} failed: {}", request_id, e);
                e
            })?;

        let mut response = text(StatusCode::OK, outcome.summary());
        response
            .headers_mut()
            .insert("hx-trigger", HeaderValue::from_static(REPLAYED_TRIGGER));
        Ok(response)
    }
}
