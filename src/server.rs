//! Listener loop and shutdown coordination
//!
//! `ChatServer` accepts connections and spawns one handler task each. When the
//! shutdown future resolves it stops accepting, closes every registered
//! connection, waits a grace period for the handlers, then closes the store.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::handler::handle_connection;
use crate::state::ServerState;

/// How long handler tasks get to finish after their connections are closed
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub const SHUTDOWN_NOTICE: &str = "server is shutting down";

/// The accept loop
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_grace: Duration,
}

impl ChatServer {
    pub fn new(listener: TcpListener, state: Arc<ServerState>) -> Self {
        Self {
            listener,
            state,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Accept until `shutdown` resolves, then tear everything down
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), AppError> {
        let ChatServer {
            listener,
            state,
            shutdown_grace,
        } = self;
        info!("ChatServer started");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let state = state.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                error!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {
                    debug!("Connection task reaped, {} active", connections.len());
                }
            }
        }

        // Stop accepting before closing anyone
        drop(listener);
        shutdown_connections(&state, connections, shutdown_grace).await;
        info!("ChatServer shutting down");
        Ok(())
    }
}

/// Close every registered connection, wait for handlers, release the store
///
/// Closing only queues a notice and wakes the writer, so a broadcast racing
/// with this sees at worst a closed queue, which it already tolerates.
pub async fn shutdown_connections(
    state: &ServerState,
    mut connections: JoinSet<()>,
    grace: Duration,
) {
    let clients = state.registry.snapshot().await;
    info!("Closing {} client connections", clients.len());
    for client in &clients {
        client.connection.close(Some(SHUTDOWN_NOTICE));
    }

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} connection tasks still running after {:?}, aborting",
            connections.len(),
            grace
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }

    if let Err(e) = state.store.close().await {
        error!("Failed to close store: {}", e);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl_c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
