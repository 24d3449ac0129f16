//! HTTP and WebSocket front end of the realtime relay.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;
