use std::sync::Arc;

use realtime_relay::SessionManager;
use realtime_relay_utils::Transcode;

/// Shared by every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub transcoder: Arc<dyn Transcode>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, transcoder: Arc<dyn Transcode>) -> Self {
        Self {
            manager,
            transcoder,
        }
    }
}
