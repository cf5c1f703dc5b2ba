/// Error types for the chat server.
/// Routing failures are logged and swallowed; request/response operations
/// surface these to their caller.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied")]
    Permission,

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;
