//! Wire types for the realtime protocol spoken on the upstream socket.
pub mod session;
pub mod tools;
pub mod audio;
pub mod events;
mod content;

//re-export types for easier access
pub use session::{ResponseConfig, Session, SessionConfigurator};
pub use content::items::Item;
pub use content::message::*;
pub use events::{ClientEvent, builder};
