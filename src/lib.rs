mod client;
mod error;
mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use realtime_relay_types as types;
pub use client::config::{Config, ConfigBuilder};
pub use client::credential::Credential;
pub use client::{consts, Client, LinkState, ServerRx};
pub use error::{Error, Result};
pub use manager::{SessionManager, SessionState};
