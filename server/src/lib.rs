/// Presence-aware chat routing server.
///
/// Authenticated WebSocket connections are tracked per identity; messages
/// are encrypted, persisted, and fanned out to every live connection of
/// their recipients. History, per-user clearing, and group management are
/// served over REST.
pub mod auth;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod membership;
pub mod registry;
pub mod router;
pub mod server;

pub use error::{ChatError, Result};
