//! Multi-room TCP Chat Server - Entry Point
//!
//! Loads configuration, opens the store, and runs the listener until Ctrl-C/SIGTERM.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tupochat::console::{run_console, spawn_stdin_reader};
use tupochat::server::shutdown_signal;
use tupochat::{ChatServer, Config, MemoryStore, ServerState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=tupochat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tupochat=info")),
        )
        .init();

    let config = Config::parse();

    // Storage must be reachable before anyone can log in
    let store = MemoryStore::from_url(&config.database).await?;
    let state = ServerState::new(Arc::new(store), config.history_limit);

    // Start TCP listener
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Chat server listening on {}", listener.local_addr()?);

    if !config.no_console {
        tokio::spawn(run_console(
            state.clone(),
            spawn_stdin_reader(),
            tokio::io::stdout(),
        ));
    }

    ChatServer::new(listener, state)
        .run(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
