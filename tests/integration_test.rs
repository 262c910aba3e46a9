//! End-to-end tests against a running server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use pipehook::app::App;
use pipehook::config::Config;
use pipehook::network::Server;
use pipehook::storage::{JournalStore, MemoryStore, Store};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    app: Arc<App>,
    handle: JoinHandle<pipehook::Result<()>>,
    http: reqwest::Client,
}

impl TestServer {
    async fn start(store: Arc<dyn Store>) -> Self {
        let mut config = Config::default();
        config.listen_addr = "127.0.0.1:0".to_string();

        let app = Arc::new(App::new(Arc::new(config), store).unwrap());
        let server = Server::bind(Arc::clone(&app)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        Self {
            addr,
            app,
            handle,
            http,
        }
    }

    async fn memory() -> Self {
        Self::start(Arc::new(MemoryStore::new())).await
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn create_endpoint(&self) -> String {
        let response = self.http.post(self.url("/endpoints")).send().await.unwrap();
        assert_eq!(response.status(), 201);
        let body: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    async fn requests(&self, endpoint_id: &str) -> Vec<Value> {
        let response = self
            .http
            .get(self.url(&format!("/endpoints/{endpoint_id}/requests")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let page: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        page["requests"].as_array().unwrap().clone()
    }

    async fn stop(self) {
        self.app.shutdown().trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_capture_reaches_sse_viewer() {
    let server = TestServer::memory().await;
    let id = server.create_endpoint().await;

    let mut stream = server
        .http
        .get(server.url(&format!("/sse/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.headers()["content-type"], "text/event-stream");

    let capture = server
        .http
        .post(server.url(&format!("/h/{id}")))
        .header("Content-Type", "application/json")
        .body(r#"{"a":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(capture.status(), 200);
    assert_eq!(capture.text().await.unwrap(), "ok");

    let mut received = String::new();
    tokio::time::timeout(WAIT, async {
        while !received.ends_with("\n\n") {
            let chunk = stream.chunk().await.unwrap().expect("stream ended");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("no event received");
    assert!(received.starts_with("event: new-request\ndata: "));
    assert!(received.contains(&format!("/h/{id}")));

    let stored = server.requests(&id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["method"], "POST");
    assert_eq!(stored[0]["path"], format!("/h/{id}"));
    assert_eq!(stored[0]["body"], r#"{"a":1}"#);

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_capture_reaches_websocket_viewer() {
    let server = TestServer::memory().await;
    let id = server.create_endpoint().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/{id}", server.addr))
        .await
        .unwrap();

    server
        .http
        .put(server.url(&format!("/h/{id}/deep/path?x=1")))
        .body("hello")
        .send()
        .await
        .unwrap();

    let message = tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("no message received")
        .unwrap()
        .unwrap();
    let Message::Text(text) = message else {
        panic!("expected text message, got {message:?}");
    };
    let event: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["type"], "new-request");
    let payload = event["payload"].as_str().unwrap();
    assert!(payload.contains("PUT"));
    assert!(payload.contains("/deep/path?x=1"));

    server.stop().await;
}

#[tokio::test]
async fn test_replay_strips_connection_headers() {
    let server = TestServer::memory().await;
    let id = server.create_endpoint().await;

    server
        .http
        .post(server.url(&format!("/h/{id}")))
        .header("Host", "old.example.com")
        .header("X-Trace", "abc")
        .body("payload")
        .send()
        .await
        .unwrap();
    let original = server.requests(&id).await;
    assert_eq!(original[0]["headers"]["host"][0], "old.example.com");
    let request_id = original[0]["id"].as_i64().unwrap();

    let replay = server
        .http
        .post(server.url(&format!("/requests/{request_id}/replay")))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 200);
    assert_eq!(replay.headers()["hx-trigger"], "requestReplayed");
    assert_eq!(
        replay.text().await.unwrap(),
        "Replayed successfully (Status: 200 OK)"
    );

    // The replay lands on the same endpoint as a fresh capture
    let after = server.requests(&id).await;
    assert_eq!(after.len(), 2);
    let replayed = &after[0];
    assert_eq!(replayed["body"], "payload");
    assert_eq!(replayed["headers"]["x-trace"][0], "abc");
    assert_eq!(replayed["headers"]["host"][0], server.addr.to_string());

    server.stop().await;
}

#[tokio::test]
async fn test_non_utf8_header_replayed_verbatim() {
    let server = TestServer::memory().await;
    let id = server.create_endpoint().await;

    server
        .http
        .post(server.url(&format!("/h/{id}")))
        .header("X-Name", reqwest::header::HeaderValue::from_bytes(b"caf\xe9").unwrap())
        .body("latin1")
        .send()
        .await
        .unwrap();
    let request_id = server.requests(&id).await[0]["id"].as_i64().unwrap();

    let replay = server
        .http
        .post(server.url(&format!("/requests/{request_id}/replay")))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 200);

    let stored = server.app.store().get_requests_with_offset(&id, 10, 0).unwrap();
    assert_eq!(stored.len(), 2);
    for request in &stored {
        assert_eq!(&request.headers.get_all("x-name")[0][..], b"caf\xe9");
    }
    server.stop().await;
}

#[tokio::test]
async fn test_replay_unknown_request() {
    let server = TestServer::memory().await;
    let response = server
        .http
        .post(server.url("/requests/999/replay"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    server.stop().await;
}

#[tokio::test]
async fn test_form_body_recovered_from_query() {
    let server = TestServer::memory().await;
    let id = server.create_endpoint().await;

    server
        .http
        .post(server.url(&format!("/h/{id}?a=1&b=2")))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .send()
        .await
        .unwrap();

    let stored = server.requests(&id).await;
    assert_eq!(stored[0]["body"], "a=1&b=2");
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_endpoint_rejected() {
    let server = TestServer::memory().await;
    let response = server
        .http
        .post(server.url("/h/missing"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = server.http.get(server.url("/sse/missing")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    server.stop().await;
}

#[tokio::test]
async fn test_deleting_endpoint_disconnects_viewers() {
    let server = TestServer::memory().await;
    let id = server.create_endpoint().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/{id}", server.addr))
        .await
        .unwrap();
    let mut sse = server
        .http
        .get(server.url(&format!("/sse/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(server.app.registry().subscriber_count(&id), 2);

    let response = server
        .http
        .delete(server.url(&format!("/endpoints/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("websocket viewer stayed open");

    let end = tokio::time::timeout(WAIT, sse.chunk())
        .await
        .expect("sse viewer stayed open");
    assert!(matches!(end, Ok(None)));

    let capture = server
        .http
        .post(server.url(&format!("/h/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(capture.status(), 404);
    server.stop().await;
}

#[tokio::test]
async fn test_journal_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hooks.journal");

    let id = {
        let store = Arc::new(JournalStore::open(&path, true).unwrap());
        let server = TestServer::start(store).await;
        let id = server.create_endpoint().await;
        server
            .http
            .post(server.url(&format!("/h/{id}")))
            .body("persisted")
            .send()
            .await
            .unwrap();
        server.stop().await;
        id
    };

    let store = Arc::new(JournalStore::open(&path, false).unwrap());
    let server = TestServer::start(store).await;
    let stored = server.requests(&id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["body"], "persisted");
    server.stop().await;
}
