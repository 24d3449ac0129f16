//! The single owner of the relay's upstream session.
//!
//! Request handlers share one [`SessionManager`] and drive it through explicit
//! transitions: `init_session` mints a credential, `start` replaces the upstream
//! link, `send` forwards onto it. The credential and link live behind one mutex
//! that is never held across an await. `start` and `stop` are additionally
//! serialized by a transition lock, so at most one link attempt is ever alive.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::client::config::Config;
use crate::client::credential::{self, Credential};
use crate::client::{Client, LinkState, ServerRx, ServerTx};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No credential has been issued yet.
    Uninitialized,
    /// A credential is held but no upstream socket is open.
    Credentialed,
    /// The upstream socket is open.
    Connected,
}

#[derive(Default)]
struct Inner {
    credential: Option<Arc<Credential>>,
    client: Option<Client>,
}

pub struct SessionManager {
    config: Config,
    http: reqwest::Client,
    events: ServerTx,
    inner: Mutex<Inner>,
    transition: Mutex<()>,
}

impl SessionManager {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let (events, _) = broadcast::channel(config.capacity());

        Ok(Self {
            config,
            http,
            events,
            inner: Mutex::new(Inner::default()),
            transition: Mutex::new(()),
        })
    }

    pub async fn state(&self) -> SessionState {
        let inner = self.inner.lock().await;
        match (&inner.credential, &inner.client) {
            (_, Some(client)) if client.is_open() => SessionState::Connected,
            (Some(_), _) => SessionState::Credentialed,
            (None, _) => SessionState::Uninitialized,
        }
    }

    /// Obtains a fresh ephemeral credential, replacing any previous one.
    ///
    /// On failure the previously held credential, if any, is kept.
    pub async fn init_session(&self) -> Result<Arc<Credential>> {
        let credential = Arc::new(credential::issue(&self.http, &self.config).await?);
        self.inner.lock().await.credential = Some(credential.clone());
        Ok(credential)
    }

    /// Tears down the current link and opens a new one with the held credential.
    ///
    /// Returns `false` when there is no credential to connect with; nothing is
    /// started in that case. The old link is closed before the new one is spawned.
    pub async fn start(&self) -> Result<bool> {
        let _transition = self.transition.lock().await;

        let previous = self.inner.lock().await.client.take();
        if let Some(previous) = previous {
            info!("replacing upstream connection");
            previous.shutdown().await;
        }

        let mut inner = self.inner.lock().await;
        let Some(credential) = inner.credential.clone() else {
            warn!("no client secret, cannot start upstream connection; call /init_session first");
            return Ok(false);
        };

        let client = Client::spawn(&self.config, &credential, self.events.clone())?;
        inner.client = Some(client);
        info!(session_id = credential.session_id().unwrap_or("unknown"), "upstream connection started");
        Ok(true)
    }

    /// Closes the current link, if any. The credential is kept.
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;

        let client = self.inner.lock().await.client.take();
        if let Some(client) = client {
            client.shutdown().await;
            info!("upstream connection stopped");
        }
    }

    /// Forwards one protocol event without waiting on the socket. Rejected unless the
    /// link is open and its outbound queue has room.
    pub async fn send<T: Serialize + ?Sized>(&self, event: &T) -> Result<()> {
        let text = serde_json::to_string(event)?;
        let inner = self.inner.lock().await;
        let client = inner.client.as_ref().ok_or(Error::NotConnected)?;
        client.send_text(text)?;
        debug!("forwarded event upstream");
        Ok(())
    }

    /// Every inbound vendor event from now on, across link replacements.
    pub fn subscribe(&self) -> ServerRx {
        self.events.subscribe()
    }

    /// Observes the current link's transitions, if a link exists.
    pub async fn link_state(&self) -> Option<watch::Receiver<LinkState>> {
        self.inner.lock().await.client.as_ref().map(Client::state_changes)
    }
}
