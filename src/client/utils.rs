use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use crate::client::config::Config;
use crate::client::consts::{AUTHORIZATION_HEADER, OPENAI_BETA_HEADER, OPENAI_BETA_REALTIME, REALTIME_PATH};

/// Builds the socket handshake, authenticated with the ephemeral secret rather than the API key.
pub fn build_request(config: &Config, bearer: &SecretString) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}{}?model={}", config.base_url(), REALTIME_PATH, config.model()).into_client_request()?;
    request.headers_mut()
        .insert(
            AUTHORIZATION_HEADER,
            format!("Bearer {}", bearer.expose_secret()).as_str().parse()?
        );
    request.headers_mut().insert(OPENAI_BETA_HEADER, OPENAI_BETA_REALTIME.parse()?);
    Ok(request)
}
