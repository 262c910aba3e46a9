//! Rendering of capture events for each live-view transport

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use super::queue::Frame;
use super::registry::Transport;
use crate::record::CapturedRequest;
use crate::{HookError, Result};

/// Event name carried by both transports
pub const EVENT_NEW_REQUEST: &str = "new-request";

/// SSE comment sent on every heartbeat tick
pub const SSE_HEARTBEAT: &str = ": keepalive\n\n";

/// Turns a captured request into a transport frame
pub trait EventRenderer: Send + Sync {
    /// Render `record` for `transport`
    ///
    /// # Errors
    ///
    /// Returns `Render` if the record cannot be rendered
    fn render(&self, transport: Transport, record: &CapturedRequest) -> Result<Frame>;
}

/// Default renderer: one HTML summary, framed per transport
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEventRenderer;

impl EventRenderer for HtmlEventRenderer {
    fn render(&self, transport: Transport, record: &CapturedRequest) -> Result<Frame> {
        let html = request_item(record);
        let framed = match transport {
            Transport::WebSocket => websocket_message(&html)?,
            Transport::Sse => sse_frame(&html),
        };
        Ok(Arc::from(framed))
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a str,
}

/// WebSocket text message: `{"type":"new-request","payload":...}`
///
/// # Errors
///
/// Returns `Render` if serialization fails
pub fn websocket_message(payload: &str) -> Result<String> {
    serde_json::to_string(&Envelope {
        kind: EVENT_NEW_REQUEST,
        payload,
    })
    .map_err(|e| HookError::Render(e.to_string()))
}

/// SSE event: one `data:` line per non-empty payload line, then a blank line
#[must_use]
pub fn sse_frame(payload: &str) -> String {
    let mut frame = String::with_capacity(payload.len() + 64);
    frame.push_str("event: ");
    frame.push_str(EVENT_NEW_REQUEST);
    frame.push('\n');

    let mut wrote_data = false;
    for line in payload.lines().filter(|line| !line.is_empty()) {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
        wrote_data = true;
    }
    if !wrote_data {
        frame.push_str("data: \n");
    }

    frame.push('\n');
    frame
}

/// HTML summary of one captured request
#[must_use]
pub fn request_item(record: &CapturedRequest) -> String {
    let mut html = String::with_capacity(512);
    let kind = if record.body_kind().is_binary() {
        "binary"
    } else {
        "text"
    };

    // Writing into a String cannot fail
    let _ = writeln!(
        html,
        r#"<li class="request-item" id="request-{}" data-request-id="{}">"#,
        record.id, record.id
    );
    let _ = writeln!(
        html,
        r#"  <span class="method method-{}">{}</span>"#,
        escape_html(&record.method.to_ascii_lowercase()),
        escape_html(&record.method)
    );
    let _ = writeln!(
        html,
        r#"  <span class="path">{}</span>"#,
        escape_html(&record.path_and_query())
    );
    let _ = writeln!(
        html,
        r#"  <span class="meta">{} &middot; {} &middot; {} bytes ({})</span>"#,
        escape_html(&record.remote_addr),
        escape_html(&record.content_type()),
        record.body.len(),
        kind
    );
    let _ = writeln!(
        html,
        r#"  <time datetime="{}">{}</time>"#,
        record.created_at.to_rfc3339(),
        record.created_at.format("%H:%M:%S")
    );
    html.push_str("</li>");
    html
}

/// Escape text for HTML element and attribute content
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
