//! Server-Sent Events live-view transport

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use super::http::ResponseBody;
use super::shutdown::ShutdownListener;
use crate::live::{Subscription, SSE_HEARTBEAT};

/// Chunks buffered between the viewer task and the response body
const BODY_BUFFER: usize = 4;

/// Start an SSE viewer for `subscription` and return the streaming response
///
/// The viewer task ends when the client disconnects, the subscription is
/// closed, or the server shuts down.
pub fn open_stream(
    subscription: Subscription,
    heartbeat: Duration,
    shutdown: ShutdownListener,
) -> Response<ResponseBody> {
    let (tx, rx) = mpsc::channel::<Bytes>(BODY_BUFFER);
    tokio::spawn(run_viewer(subscription, tx, heartbeat, shutdown));

    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(Frame::data(chunk)), rx))
    });

    let mut response = Response::new(StreamBody::new(chunks).boxed_unsync());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

async fn run_viewer(
    mut subscription: Subscription,
    tx: mpsc::Sender<Bytes>,
    heartbeat: Duration,
    mut shutdown: ShutdownListener,
) {
    let endpoint_id = subscription.endpoint_id().to_string();
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        let chunk = tokio::select! {
            frame = subscription.next() => match frame {
                Some(frame) => Bytes::copy_from_slice(frame.as_bytes()),
                None => {
                    debug!("SSE stream of {} closed by server", endpoint_id);
                    break;
                }
            },
            _ = ticker.tick() => Bytes::from_static(SSE_HEARTBEAT.as_bytes()),
            () = tx.closed() => {
                debug!("SSE viewer of {} disconnected", endpoint_id);
                break;
            }
            () = shutdown.wait() => break,
        };

        if tx.send(chunk).await.is_err() {
            debug!("SSE viewer of {} disconnected", endpoint_id);
            break;
        }
    }

    if subscription.dropped() > 0 {
        debug!(
            "SSE viewer of {} missed {} events",
            endpoint_id,
            subscription.dropped()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{Broadcaster, SubscriptionRegistry, Transport};
    use crate::network::shutdown::Shutdown;
    use crate::record::{CapturedRequest, HeaderList};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    fn record() -> CapturedRequest {
        CapturedRequest {
            id: 1,
            endpoint_id: "e1".to_string(),
            method: "POST".to_string(),
            path: "/h/e1".to_string(),
            query: None,
            remote_addr: "127.0.0.1:1".to_string(),
            headers: HeaderList::new(),
            body: Bytes::from_static(b"{}"),
            status_code: 200,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_stream_carries_events_then_ends() {
        let registry = Arc::new(SubscriptionRegistry::new(4));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let shutdown = Shutdown::new();

        let subscription = registry.subscribe("e1", Transport::Sse);
        let response = open_stream(subscription, Duration::from_secs(60), shutdown.listener());
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");

        assert_eq!(broadcaster.publish("e1", &record()).delivered, 1);
        registry.close_all("e1");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("event: new-request\ndata: "));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_emitted() {
        let registry = Arc::new(SubscriptionRegistry::new(4));
        let shutdown = Shutdown::new();
        let subscription = registry.subscribe("e1", Transport::Sse);

        let response = open_stream(subscription, Duration::from_secs(15), shutdown.listener());
        let mut body = response.into_body();

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b": keepalive\n\n"));
    }

    #[tokio::test]
    async fn test_dropping_body_unsubscribes() {
        let registry = Arc::new(SubscriptionRegistry::new(4));
        let shutdown = Shutdown::new();
        let subscription = registry.subscribe("e1", Transport::Sse);

        let response = open_stream(subscription, Duration::from_secs(60), shutdown.listener());
        drop(response);

        for _ in 0..50 {
            if registry.subscriber_count("e1") == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("viewer task did not unsubscribe");
    }
}
