use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::client::credential::Credential;
use crate::error::{Error, Result};
use crate::types::builder;

pub mod config;
pub mod consts;
pub mod credential;
mod utils;

pub type ClientTx = mpsc::Sender<String>;
type ClientRx = mpsc::Receiver<String>;
pub type ServerTx = broadcast::Sender<Value>;
pub type ServerRx = broadcast::Receiver<Value>;

/// How long `shutdown` waits for the driver to send a close frame before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Handshake in flight.
    Connecting,
    /// Handshake done; outbound events are written in FIFO order.
    Open,
    /// Handshake failed or the socket went away. Terminal.
    Closed,
}

/// One upstream socket and the task that drives it.
pub struct Client {
    c_tx: ClientTx,
    state: watch::Receiver<LinkState>,
    driver: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Starts connecting in the background; inbound events are published on `s_tx`.
    pub fn spawn(config: &config::Config, credential: &Credential, s_tx: ServerTx) -> Result<Self> {
        let request = utils::build_request(config, credential.client_secret())?;

        let greeting = if config.session_update_on_open() {
            Some(serde_json::to_string(&builder::session_update())?)
        } else {
            None
        };

        let (c_tx, c_rx) = mpsc::channel(config.capacity());
        let (state_tx, state) = watch::channel(LinkState::Connecting);

        let driver = tokio::spawn(drive(
            request,
            config.connect_timeout(),
            greeting,
            c_rx,
            s_tx,
            state_tx,
        ));

        Ok(Self {
            c_tx,
            state,
            driver,
        })
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// A receiver that observes every state transition of this link.
    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Enqueues a serialized event without waiting. Rejected unless the socket is
    /// open and the outbound queue has room.
    pub fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        self.c_tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => Error::Backlogged,
            TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Closes the socket and waits for the driver to finish.
    pub async fn shutdown(self) {
        let Client { c_tx, state, mut driver } = self;
        let connecting = *state.borrow() == LinkState::Connecting;
        // Dropping the last sender tells an open driver to send a close frame.
        drop(c_tx);

        let joined = if connecting {
            driver.abort();
            driver.await
        } else {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut driver).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("upstream driver did not stop in time, aborting");
                    driver.abort();
                    driver.await
                }
            }
        };

        if let Err(e) = joined {
            if e.is_panic() {
                error!("upstream driver panicked: {}", e);
            }
        }
    }
}

async fn drive(
    request: Request,
    connect_timeout: Duration,
    greeting: Option<String>,
    mut c_rx: ClientRx,
    s_tx: ServerTx,
    state_tx: watch::Sender<LinkState>,
) {
    let ws_stream = match tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((ws_stream, response))) => {
            info!(status = %response.status(), "connected to realtime api");
            ws_stream
        }
        Ok(Err(e)) => {
            error!("failed to connect to realtime api: {}", e);
            state_tx.send_replace(LinkState::Closed);
            return;
        }
        Err(_) => {
            error!(timeout = ?connect_timeout, "timed out connecting to realtime api");
            state_tx.send_replace(LinkState::Closed);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    if let Some(greeting) = greeting {
        if let Err(e) = write.send(Message::Text(greeting)).await {
            error!("failed to send session.update: {}", e);
            state_tx.send_replace(LinkState::Closed);
            return;
        }
        debug!("sent session.update on open");
    }

    state_tx.send_replace(LinkState::Open);

    loop {
        tokio::select! {
            outbound = c_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        error!("failed to send message: {}", e);
                        break;
                    }
                }
                None => {
                    debug!("client handle dropped, closing upstream socket");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("failed to send close frame: {}", e);
                    }
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => relay(&s_tx, &text),
                Some(Ok(Message::Binary(bin))) => {
                    warn!(len = bin.len(), "unexpected binary message");
                }
                Some(Ok(Message::Close(reason))) => {
                    info!("connection closed: {:?}", reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("failed to read message: {}", e);
                    break;
                }
                None => {
                    info!("upstream stream ended");
                    break;
                }
            },
        }
    }

    state_tx.send_replace(LinkState::Closed);
}

/// Publishes one inbound frame to every front-end listener, untouched.
fn relay(s_tx: &ServerTx, text: &str) {
    let json = match serde_json::from_str::<Value>(text) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to parse event: {}, text=> {:?}", e, text);
            return;
        }
    };

    let event_type = json.get("type").and_then(|v| v.as_str());
    let event_id = json.get("event_id").and_then(|v| v.as_str());
    debug!("received message: {}, id={}", event_type.unwrap_or("unknown"), event_id.unwrap_or("unknown"));

    if s_tx.send(json).is_err() {
        debug!("no front-end listeners for event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_forwards_json_verbatim() {
        let (s_tx, mut s_rx) = broadcast::channel(4);
        relay(&s_tx, r#"{"type":"session.created","event_id":"evt_1","session":{"id":"sess_1"}}"#);

        let event = s_rx.try_recv().unwrap();
        assert_eq!(event["type"], "session.created");
        assert_eq!(event["session"]["id"], "sess_1");
    }

    #[test]
    fn relay_drops_non_json_frames() {
        let (s_tx, mut s_rx) = broadcast::channel(4);
        relay(&s_tx, "not json");
        assert!(s_rx.try_recv().is_err());
    }

    #[test]
    fn relay_without_listeners_is_harmless() {
        let (s_tx, s_rx) = broadcast::channel::<Value>(4);
        drop(s_rx);
        relay(&s_tx, r#"{"type":"response.done"}"#);
    }
}
