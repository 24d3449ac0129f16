use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use realtime_relay_utils::TranscodeError;
use tracing::{error, warn};

pub const NO_MESSAGE: &str = "No message provided.";
pub const INVALID_EVENT_TYPE: &str = "Invalid event type.";
pub const NO_AUDIO: &str = "No audio file provided.";

/// Everything a handler can fail with, rendered as a plain-text body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The vendor rejected session issuance; its status and text pass through.
    #[error("Failed to create session: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("No client secret returned.")]
    MissingClientSecret,
    #[error("{0}")]
    Validation(&'static str),
    #[error("{}", .0.body_text())]
    Upload(#[from] MultipartError),
    #[error("WebSocket not connected.")]
    NotConnected,
    #[error("Upstream socket is busy, try again.")]
    Backlogged,
    #[error("Error processing audio: {}", .0.diagnostic())]
    Transcode(#[from] TranscodeError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Upstream { status, .. } => *status,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upload(e) => e.status(),
            AppError::NotConnected | AppError::Backlogged => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MissingClientSecret | AppError::Transcode(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<realtime_relay::Error> for AppError {
    fn from(err: realtime_relay::Error) -> Self {
        match err {
            realtime_relay::Error::Upstream { status, body } => AppError::Upstream {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                body,
            },
            realtime_relay::Error::Http(e) => AppError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                body: e.to_string(),
            },
            realtime_relay::Error::MissingClientSecret => AppError::MissingClientSecret,
            realtime_relay::Error::NotConnected => AppError::NotConnected,
            realtime_relay::Error::Backlogged => AppError::Backlogged,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "{}", self);
        } else {
            warn!(status = status.as_u16(), "{}", self);
        }
        (status, self.to_string()).into_response()
    }
}
