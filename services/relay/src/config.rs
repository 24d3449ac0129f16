//! Application Configuration Module
//!
//! Loads the relay's settings from the environment once at startup and turns
//! them into the pieces the rest of the service is built from.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use realtime_relay::consts::{API_BASE_URL, BASE_URL, DEFAULT_MODEL};
use realtime_relay_utils::FfmpegTranscoder;
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5659";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub model: String,
    pub api_base_url: String,
    pub realtime_base_url: String,
    pub ffmpeg_path: PathBuf,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub transcode_timeout: Duration,
    pub max_upload_bytes: usize,
    pub session_update_on_open: bool,
    /// An `EnvFilter` directive string, validated at load.
    pub log_filter: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// A `.env` file in the current directory is honoured. Recognised variables:
    ///
    /// *   `OPENAI_API_KEY`: Secret key used to mint ephemeral sessions. Required.
    /// *   `BIND_ADDRESS`: Address the HTTP server binds to. Defaults to "127.0.0.1:5659".
    /// *   `REALTIME_MODEL`: Realtime model. Defaults to "gpt-4o-realtime-preview-2024-12-17".
    /// *   `OPENAI_API_BASE`: REST base for session issuance.
    /// *   `OPENAI_REALTIME_BASE`: WebSocket base for the realtime socket.
    /// *   `FFMPEG_PATH`: Transcoder binary. Defaults to "ffmpeg".
    /// *   `HTTP_TIMEOUT_SECS`, `CONNECT_TIMEOUT_SECS`, `TRANSCODE_TIMEOUT_SECS`: Bounds in seconds.
    /// *   `MAX_UPLOAD_BYTES`: Largest accepted request body.
    /// *   `SESSION_UPDATE_ON_OPEN`: Send `session.update` right after connecting. Defaults to false.
    /// *   `RUST_LOG`: (Optional) Log filter directives, e.g. "info,tower_http=debug". Defaults to "info".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address: SocketAddr =
            parse(&lookup, "BIND_ADDRESS", DEFAULT_BIND_ADDRESS.parse().ok())?;

        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let model = lookup("REALTIME_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_base_url = lookup("OPENAI_API_BASE").unwrap_or_else(|| API_BASE_URL.to_string());
        let realtime_base_url =
            lookup("OPENAI_REALTIME_BASE").unwrap_or_else(|| BASE_URL.to_string());
        let ffmpeg_path = lookup("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()).into();

        let http_timeout = Duration::from_secs(parse(&lookup, "HTTP_TIMEOUT_SECS", Some(30))?);
        let connect_timeout = Duration::from_secs(parse(&lookup, "CONNECT_TIMEOUT_SECS", Some(15))?);
        let transcode_timeout =
            Duration::from_secs(parse(&lookup, "TRANSCODE_TIMEOUT_SECS", Some(60))?);
        let max_upload_bytes =
            parse(&lookup, "MAX_UPLOAD_BYTES", Some(DEFAULT_MAX_UPLOAD_BYTES))?;

        let session_update_on_open = match lookup("SESSION_UPDATE_ON_OPEN") {
            None => false,
            Some(value) => parse_flag(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SESSION_UPDATE_ON_OPEN".to_string(),
                    format!("'{}' is not a boolean", value),
                )
            })?,
        };

        let log_filter = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());
        EnvFilter::try_new(&log_filter)
            .map_err(|e| ConfigError::InvalidValue("RUST_LOG".to_string(), e.to_string()))?;

        Ok(Self {
            bind_address,
            openai_api_key: SecretString::from(openai_api_key),
            model,
            api_base_url,
            realtime_base_url,
            ffmpeg_path,
            http_timeout,
            connect_timeout,
            transcode_timeout,
            max_upload_bytes,
            session_update_on_open,
            log_filter,
        })
    }

    /// Settings for the upstream session client.
    pub fn client_config(&self) -> realtime_relay::Config {
        realtime_relay::Config::builder()
            .with_api_key(self.openai_api_key.expose_secret())
            .with_model(&self.model)
            .with_api_base_url(&self.api_base_url)
            .with_base_url(&self.realtime_base_url)
            .with_request_timeout(self.http_timeout)
            .with_connect_timeout(self.connect_timeout)
            .with_session_update_on_open(self.session_update_on_open)
            .build()
    }

    pub fn transcoder(&self) -> FfmpegTranscoder {
        FfmpegTranscoder::new(&self.ffmpeg_path).with_timeout(self.transcode_timeout)
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: Option<T>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVar(key.to_string())),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
