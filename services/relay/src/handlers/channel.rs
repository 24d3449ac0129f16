//! The browser channel on `/ws`.
//!
//! Frames are JSON text `{"event": <name>, "data": <payload>}` in both directions.
//! Every vendor event is pushed to every connected browser as `openai_event`.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{Sink, SinkExt, StreamExt};
use realtime_relay::Error;
use realtime_relay_types::builder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::NO_MESSAGE;
use crate::state::AppState;

pub const CONNECT_RESPONSE: &str = "connect_response";
pub const CLIENT_EVENT: &str = "client_event";
pub const SERVER_RESPONSE: &str = "server_response";
pub const OPENAI_EVENT: &str = "openai_event";

pub const CONNECTED: &str = "Connected to backend WebSocket!";
pub const PROCESSED: &str = "Event processed";
pub const NOT_CONNECTED: &str = "WebSocket not connected.";
pub const NOT_FORWARDED: &str = "Failed to forward event.";

#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

pub async fn browser_channel(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("front-end client connected");

    // Subscribe before greeting so nothing published after the greeting is missed.
    let mut events = state.manager.subscribe();
    let (mut sink, mut stream) = socket.split();

    if emit(&mut sink, Frame::new(CONNECT_RESPONSE, json!({ "message": CONNECTED })))
        .await
        .is_ok()
    {
        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = on_frame(&state, text.as_str()).await else {
                            continue;
                        };
                        if emit(&mut sink, reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("front-end socket error: {}", e);
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        if emit(&mut sink, Frame::new(OPENAI_EVENT, event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "front-end client fell behind, dropping vendor events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    info!("front-end client disconnected");
}

async fn emit<S>(sink: &mut S, frame: Frame) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(&frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

/// Handles one browser frame, returning the acknowledgment to send back.
async fn on_frame(state: &AppState, text: &str) -> Option<Frame> {
    let frame = match serde_json::from_str::<Frame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("dropping malformed front-end frame: {}", e);
            return None;
        }
    };

    if frame.event != CLIENT_EVENT {
        debug!(event = %frame.event, "ignoring front-end event");
        return None;
    }
    debug!("received event from front-end: {}", frame.data);

    let (message, forwarded) = forward(state, &frame.data).await;
    Some(Frame::new(
        SERVER_RESPONSE,
        json!({ "message": message, "forwarded": forwarded }),
    ))
}

/// A `data` carrying its own `type` is a complete protocol event; anything else
/// is a text prompt under `message`.
async fn forward(state: &AppState, data: &Value) -> (&'static str, bool) {
    let result = if data.get("type").and_then(Value::as_str).is_some() {
        state.manager.send(data).await
    } else {
        let message = data.get("message").and_then(Value::as_str).unwrap_or_default();
        if message.is_empty() {
            return (NO_MESSAGE, false);
        }
        state.manager.send(&builder::text_response(message)).await
    };

    match result {
        Ok(()) => (PROCESSED, true),
        Err(Error::NotConnected) => (NOT_CONNECTED, false),
        Err(e) => {
            warn!("failed to forward front-end event: {}", e);
            (NOT_FORWARDED, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use realtime_relay::testing::{FakeVendor, IssueMode};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Browser = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn serve(app: axum::Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn open_browser(addr: SocketAddr) -> Browser {
        let (browser, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        browser
    }

    async fn next_frame(browser: &mut Browser) -> Frame {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), browser.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("channel closed")
                .unwrap();
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn client_event(browser: &mut Browser, data: Value) {
        let frame = serde_json::to_string(&Frame::new(CLIENT_EVENT, data)).unwrap();
        browser.send(WsMessage::Text(frame)).await.unwrap();
    }

    #[tokio::test]
    async fn greets_and_reports_unforwarded_events() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let addr = serve(app(manager_for(&vendor), unused_transcoder())).await;
        let mut browser = open_browser(addr).await;

        let greeting = next_frame(&mut browser).await;
        assert_eq!(greeting.event, CONNECT_RESPONSE);
        assert_eq!(greeting.data["message"], CONNECTED);

        client_event(&mut browser, json!({ "message": "hello?" })).await;
        let reply = next_frame(&mut browser).await;
        assert_eq!(reply.event, SERVER_RESPONSE);
        assert_eq!(reply.data["message"], NOT_CONNECTED);
        assert_eq!(reply.data["forwarded"], false);

        client_event(&mut browser, json!({})).await;
        let reply = next_frame(&mut browser).await;
        assert_eq!(reply.data["message"], NO_MESSAGE);
        assert_eq!(reply.data["forwarded"], false);
    }

    #[tokio::test]
    async fn relays_both_directions_once_connected() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        let addr = serve(app(manager.clone(), unused_transcoder())).await;
        let mut browser = open_browser(addr).await;
        assert_eq!(next_frame(&mut browser).await.event, CONNECT_RESPONSE);

        connect(&manager).await;

        let pushed = next_frame(&mut browser).await;
        assert_eq!(pushed.event, OPENAI_EVENT);
        assert_eq!(pushed.data["type"], "session.created");

        client_event(&mut browser, json!({ "message": "Summarise the call" })).await;
        let reply = next_frame(&mut browser).await;
        assert_eq!(reply.event, SERVER_RESPONSE);
        assert_eq!(reply.data["message"], PROCESSED);
        assert_eq!(reply.data["forwarded"], true);

        let received = vendor.next_received().await.unwrap();
        assert_eq!(received["type"], "response.create");
        assert_eq!(received["response"]["instructions"], "Summarise the call");
    }

    #[tokio::test]
    async fn typed_events_are_forwarded_verbatim() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;
        let addr = serve(app(manager, unused_transcoder())).await;
        let mut browser = open_browser(addr).await;
        assert_eq!(next_frame(&mut browser).await.event, CONNECT_RESPONSE);

        let event = json!({ "type": "input_audio_buffer.clear", "event_id": "evt_browser_1" });
        client_event(&mut browser, event.clone()).await;
        let reply = next_frame(&mut browser).await;
        assert_eq!(reply.data["forwarded"], true);

        assert_eq!(vendor.next_received().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_frames_are_ignored() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let addr = serve(app(manager_for(&vendor), unused_transcoder())).await;
        let mut browser = open_browser(addr).await;
        assert_eq!(next_frame(&mut browser).await.event, CONNECT_RESPONSE);

        browser.send(WsMessage::Text("not json".to_string())).await.unwrap();
        let unknown = serde_json::to_string(&Frame::new("ping", Value::Null)).unwrap();
        browser.send(WsMessage::Text(unknown)).await.unwrap();
        client_event(&mut browser, json!({ "message": "still here" })).await;

        // Only the client_event is acknowledged.
        let reply = next_frame(&mut browser).await;
        assert_eq!(reply.event, SERVER_RESPONSE);
        assert_eq!(reply.data["message"], NOT_CONNECTED);
    }
}
