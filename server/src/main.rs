/// Chat Server - presence-aware message routing
///
/// Main server entry point. Handles:
/// - Command-line argument parsing
/// - Database and key initialization
/// - HTTP and WebSocket server startup
use actix_web::web;
use anyhow::Context;
use chat_server::auth::{AccountDirectory, OpenDirectory, SessionAuthenticator, TokenVerifier};
use chat_server::codec::MessageCodec;
use chat_server::config::Config;
use chat_server::db::{self, HistoryStore};
use chat_server::handlers::ServerConfig;
use chat_server::membership::GroupMembership;
use chat_server::registry::ConnectionRegistry;
use chat_server::router::Router;
use chat_server::server;
use std::fs;
use std::process;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args();

    log::info!("Starting Chat Server");
    log::info!("Database: {:?}", config.database);
    log::info!("Listening on: {}", config.bind_addr());

    // Write PID file if specified
    if let Some(pidfile) = &config.pidfile {
        let pid = process::id().to_string();
        fs::write(pidfile, pid)
            .with_context(|| format!("Failed to write PID file {:?}", pidfile))?;
        log::info!("PID file written to: {:?}", pidfile);
    }

    let codec = Arc::new(
        MessageCodec::from_key_material(&config.encryption_key)
            .context("Invalid ENCRYPTION_KEY")?,
    );
    let verifier = TokenVerifier::new(&config.access_secret).context("Invalid ACCESS_SECRET")?;

    // Initialize database
    let database = config
        .database
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let pool = db::create_pool(database).context("Failed to create database pool")?;
    log::info!("Database initialized");

    let directory: Arc<dyn AccountDirectory> = Arc::new(OpenDirectory);
    let router = web::Data::new(Router::new(
        Arc::new(ConnectionRegistry::new()),
        HistoryStore::new(pool.clone(), codec.clone()),
        GroupMembership::new(pool, directory.clone()),
        codec,
        directory,
    ));
    let authenticator = web::Data::new(SessionAuthenticator::new(Arc::new(verifier)));
    let server_config = web::Data::new(ServerConfig {
        inbound_queue_capacity: config.inbound_queue_capacity,
    });

    // Start HTTP server
    let bind_addr = config.bind_addr();
    log::info!("Starting HTTP server on {}", bind_addr);

    let http_server = server::create_http_server(router, authenticator, server_config, &bind_addr)
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    http_server.await.context("HTTP server failed")?;
    Ok(())
}
