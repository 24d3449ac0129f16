use std::time::Duration;

use secrecy::SecretString;

use crate::client::consts::{API_BASE_URL, BASE_URL, DEFAULT_MODEL, OPENAI_API_KEY};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct Config {
    base_url: String,
    api_base_url: String,
    api_key: SecretString,
    model: String,
    request_timeout: Duration,
    connect_timeout: Duration,
    capacity: usize,
    session_update_on_open: bool,
}

pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    /// Socket base, e.g. `wss://api.openai.com/v1`.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// REST base used for session issuance, e.g. `https://api.openai.com/v1`.
    pub fn with_api_base_url(mut self, api_base_url: &str) -> Self {
        self.config.api_base_url = api_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn with_session_update_on_open(mut self, enabled: bool) -> Self {
        self.config.session_update_on_open = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    // Sets the default values; the API key falls back to the environment.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_base_url: API_BASE_URL.to_string(),
            api_key: std::env::var(OPENAI_API_KEY)
                .unwrap_or_default()
                .into(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            capacity: DEFAULT_CAPACITY,
            session_update_on_open: false,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn session_update_on_open(&self) -> bool {
        self.session_update_on_open
    }
}
