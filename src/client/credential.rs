use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::client::config::Config;
use crate::client::consts::SESSIONS_PATH;
use crate::error::{Error, Result};
use crate::types::builder;
use crate::types::session::SessionCreateResponse;

/// An ephemeral secret minted for one realtime session.
///
/// The vendor attaches an expiry to it; the relay does not track it and simply
/// lets the socket handshake fail once it has lapsed.
#[derive(Debug)]
pub struct Credential {
    session_id: Option<String>,
    client_secret: SecretString,
}

impl Credential {
    pub fn new(session_id: Option<String>, client_secret: SecretString) -> Self {
        Self {
            session_id,
            client_secret,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }
}

/// Exchanges the static API key for an ephemeral session secret.
pub async fn issue(http: &reqwest::Client, config: &Config) -> Result<Credential> {
    let url = format!("{}{}", config.api_base_url(), SESSIONS_PATH);
    let body = builder::session_create_request(config.model());

    let response = http
        .post(&url)
        .bearer_auth(config.api_key().expose_secret())
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), %body, "session issuance rejected");
        return Err(Error::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    let created = response.json::<SessionCreateResponse>().await?;
    let secret = created
        .secret_value()
        .ok_or(Error::MissingClientSecret)?
        .to_string();

    info!(session_id = created.id.as_deref().unwrap_or("unknown"), "session issued");
    Ok(Credential::new(created.id, SecretString::from(secret)))
}
