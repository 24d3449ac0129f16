/// Failures of the upstream session client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request to the realtime api failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The vendor answered with a non-success status; `body` is its own error text.
    #[error("realtime api returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("no client secret returned")]
    MissingClientSecret,
    #[error("upstream socket is not connected")]
    NotConnected,
    /// The socket stopped draining and the outbound queue is full.
    #[error("upstream socket is not keeping up")]
    Backlogged,
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid socket handshake: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
