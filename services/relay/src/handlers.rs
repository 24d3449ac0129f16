pub mod api;
pub mod channel;

pub use api::{conversation_item_create, home, init_session, send, start, status, truncate_audio};
pub use channel::browser_channel;
