//! An in-process stand-in for the realtime API, for tests.
//!
//! Serves the session issuance endpoint and the realtime socket on a loopback
//! port. Every JSON event a client sends is captured; a `test.hangup` event makes
//! the fake close that socket instead. A stalled fake greets and then never reads.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::client::config::{Config, ConfigBuilder};

pub const SESSION_ID: &str = "sess_fake";
pub const CLIENT_SECRET: &str = "ek_fake";
pub const HANGUP: &str = "test.hangup";

const WAIT: Duration = Duration::from_secs(5);

/// How the fake answers `POST /v1/realtime/sessions`.
#[derive(Debug, Clone, Copy)]
pub enum IssueMode {
    Ok,
    Reject(u16, &'static str),
    NoSecret,
}

#[derive(Clone)]
struct FakeState {
    mode: IssueMode,
    stalled: bool,
    received: mpsc::UnboundedSender<Value>,
    open_sockets: Arc<AtomicUsize>,
}

pub struct FakeVendor {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Value>,
    open_sockets: Arc<AtomicUsize>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeVendor {
    pub async fn start(mode: IssueMode) -> Self {
        Self::serve(mode, false).await
    }

    /// Issues credentials normally, but its sockets stop reading after the greeting,
    /// so a client's writes back up once the TCP buffers fill.
    pub async fn stalled() -> Self {
        Self::serve(IssueMode::Ok, true).await
    }

    async fn serve(mode: IssueMode, stalled: bool) -> Self {
        let (tx, received) = mpsc::unbounded_channel();
        let open_sockets = Arc::new(AtomicUsize::new(0));
        let state = FakeState {
            mode,
            stalled,
            received: tx,
            open_sockets: open_sockets.clone(),
        };

        let app = Router::new()
            .route("/v1/realtime/sessions", post(issue))
            .route("/v1/realtime", get(realtime))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake vendor");
        let addr = listener.local_addr().expect("fake vendor address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            received,
            open_sockets,
            server,
        }
    }

    /// A client config aimed at this fake, with short timeouts.
    pub fn config_builder(&self) -> ConfigBuilder {
        Config::builder()
            .with_base_url(&format!("ws://{}/v1", self.addr))
            .with_api_base_url(&format!("http://{}/v1", self.addr))
            .with_api_key("sk-test")
            .with_request_timeout(WAIT)
            .with_connect_timeout(WAIT)
    }

    pub fn config(&self) -> Config {
        self.config_builder().build()
    }

    /// The next event a client sent, or `None` after a few seconds of silence.
    pub async fn next_received(&mut self) -> Option<Value> {
        tokio::time::timeout(WAIT, self.received.recv()).await.ok().flatten()
    }

    pub fn try_received(&mut self) -> Option<Value> {
        self.received.try_recv().ok()
    }

    pub fn open_sockets(&self) -> usize {
        self.open_sockets.load(Ordering::SeqCst)
    }

    pub async fn wait_for_open_sockets(&self, wanted: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.open_sockets() != wanted {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {wanted} open sockets, have {}",
                self.open_sockets()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeVendor {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// An event that makes the fake hang up on the sender.
pub fn hangup() -> Value {
    json!({ "type": HANGUP })
}

async fn issue(State(state): State<FakeState>, headers: HeaderMap) -> Response {
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, "missing api key").into_response();
    }

    match state.mode {
        IssueMode::Ok => Json(json!({
            "id": SESSION_ID,
            "object": "realtime.session",
            "client_secret": { "value": CLIENT_SECRET, "expires_at": 1_900_000_000 },
        }))
        .into_response(),
        IssueMode::Reject(status, message) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            let body = json!({ "error": { "message": message, "type": "invalid_request_error" } });
            (status, Json(body)).into_response()
        }
        IssueMode::NoSecret => Json(json!({ "id": SESSION_ID })).into_response(),
    }
}

async fn realtime(State(state): State<FakeState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let bearer = format!("Bearer {CLIENT_SECRET}");
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(bearer.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: FakeState) {
    state.open_sockets.fetch_add(1, Ordering::SeqCst);

    let created = json!({ "type": "session.created", "event_id": "evt_fake_0", "session": { "id": SESSION_ID } });
    if state.stalled {
        let _ = socket.send(Message::Text(created.to_string().into())).await;
        std::future::pending::<()>().await;
    }
    if socket.send(Message::Text(created.to_string().into())).await.is_ok() {
        while let Some(Ok(message)) = socket.recv().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(event) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            if event["type"] == HANGUP {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            let _ = state.received.send(event);
        }
    }

    state.open_sockets.fetch_sub(1, Ordering::SeqCst);
}
