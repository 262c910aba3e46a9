//! WebSocket live-view transport

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hyper::header::{
    HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use hyper::upgrade::Upgraded;
use hyper::{HeaderMap, Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use super::http::{empty, ResponseBody};
use super::shutdown::ShutdownListener;
use crate::live::Subscription;
use crate::{HookError, Result};

const SUPPORTED_VERSION: &str = "13";

fn header_has_token(headers: &HeaderMap, name: hyper::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Validate a WebSocket handshake and return the client key
///
/// # Errors
///
/// Returns a 400-class error if the request is not a valid upgrade
pub fn handshake_key(method: &Method, headers: &HeaderMap) -> Result<String> {
    if *method != Method::GET {
        return Err(HookError::MethodNotAllowed);
    }
    if !header_has_token(headers, CONNECTION, "upgrade")
        || !header_has_token(headers, UPGRADE, "websocket")
    {
        return Err(HookError::MissingParameter("websocket upgrade"));
    }

    let version = headers
        .get(SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if version.trim() != SUPPORTED_VERSION {
        return Err(HookError::InvalidParameter {
            name: "Sec-WebSocket-Version",
            value: version.to_string(),
        });
    }

    headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or(HookError::MissingParameter("Sec-WebSocket-Key"))
}

/// `101 Switching Protocols` response for a validated handshake
#[must_use]
pub fn switching_protocols(key: &str) -> Response<ResponseBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    response
}

/// Wrap an upgraded connection as a server-side WebSocket
pub async fn server_stream(upgraded: Upgraded) -> WebSocketStream<TokioIo<Upgraded>> {
    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await
}

/// Push frames of `subscription` to the viewer until either side goes away
///
/// Sends a ping every `heartbeat` and answers client pings.
pub async fn run_viewer<S>(
    ws: WebSocketStream<S>,
    mut subscription: Subscription,
    heartbeat: Duration,
    mut shutdown: ShutdownListener,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let endpoint_id = subscription.endpoint_id().to_string();
    let (mut sink, mut stream) = ws.split();
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        tokio::select! {
            frame = subscription.next() => {
                let Some(frame) = frame else {
                    debug!("Live view of {} closed by server", endpoint_id);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                    debug!("WebSocket viewer of {} went away: {}", endpoint_id, e);
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket viewer of {} disconnected", endpoint_id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => break,
                Some(Err(e)) => {
                    warn!("WebSocket viewer of {} closed abnormally: {}", endpoint_id, e);
                    break;
                }
            },
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            () = shutdown.wait() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = sink.close().await;
    if subscription.dropped() > 0 {
        debug!(
            "WebSocket viewer of {} missed {} events",
            endpoint_id,
            subscription.dropped()
        );
    }
}
