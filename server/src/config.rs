/// Configuration management for the chat server.
/// Handles command-line argument parsing and config structure.
/// Secrets may also be supplied through the environment.
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "Chat Server")]
#[command(about = "Presence-aware chat routing server", long_about = None)]
pub struct Config {
    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port (default: 5000)
    #[arg(long, default_value = "5000")]
    pub port: u16,

    /// SQLite database file path (default: chatserver.db)
    #[arg(long, default_value = "chatserver.db")]
    pub database: PathBuf,

    /// PID file path (optional) - write server PID to this file on startup
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// Message encryption key: 32 raw bytes or 64 hex characters
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: String,

    /// Secret used to verify bearer tokens
    #[arg(long, env = "ACCESS_SECRET", hide_env_values = true)]
    pub access_secret: String,

    /// Send intents buffered per connection before new ones are dropped
    #[arg(long, default_value = "256")]
    pub inbound_queue_capacity: usize,
}

impl Config {
    /// Parse command-line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
