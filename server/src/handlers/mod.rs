/// HTTP handlers module
/// Provides REST and WebSocket endpoints

pub mod rest;
pub mod websocket;

pub use rest::{
    add_member, clear_direct_history, clear_group_history, create_group, delete_group,
    error_response, exit_group, get_direct_history, get_group_messages, health, list_groups,
    remove_member,
};
pub use websocket::{ws_connect, ServerConfig, WsSession};
