//! TCP connection handler
//!
//! Handles individual client connections: handshake, registration, and the
//! command loop, with a dedicated writer task draining the outbound queue.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::auth::{AuthOutcome, AuthSession};
use crate::broadcast::replay_history;
use crate::client::{Client, Connection};
use crate::command::{CommandDispatcher, Dispatch, INTERNAL_ERROR};
use crate::error::{AppError, ReplayError};
use crate::line::LineReader;
use crate::state::ServerState;
use crate::types::{SessionId, GLOBAL_ROOM};

/// Outbound queue depth per connection
pub const OUTBOUND_BUFFER: usize = 256;

pub const WELCOME: &str = "Welcome to tupochat! Type /help for commands";
pub const TAKEOVER_NOTICE: &str = "logged in from another connection";

/// Handle a new TCP connection
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    serve_stream(stream, peer_addr, state).await
}

/// Run one session over any byte stream
///
/// Returns once the peer disconnects, sends `/exit`, fails the handshake,
/// or the connection is closed from elsewhere (shutdown, takeover).
pub async fn serve_stream<S>(stream: S, peer: String, state: Arc<ServerState>) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let session = SessionId::new();
    let span = info_span!("conn", %session, %peer);
    async move {
        debug!("New connection");
        let (read_half, write_half) = tokio::io::split(stream);

        // Server -> client queue, drained by a single writer
        let (tx, rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let closer = Arc::new(Notify::new());
        let connection = Connection::new(session, tx, closer.clone());
        let mut write_task = tokio::spawn(write_loop(write_half, rx, closer));

        let mut lines = LineReader::new(BufReader::new(read_half));
        let mut registered: Option<String> = None;
        let mut writer_done = false;

        // Wait for either the session or the writer to finish
        let result = tokio::select! {
            res = run_session(&state, &connection, &mut lines, &mut registered) => res,
            _ = &mut write_task => {
                debug!("Write task completed");
                writer_done = true;
                Ok(())
            }
        };

        if let Some(login) = &registered {
            if state.registry.remove_session(login, session).await.is_some() {
                info!("Client {} disconnected", login);
            }
        }

        if !writer_done {
            connection.close(None);
            let _ = write_task.await;
        }

        match result {
            Ok(()) | Err(AppError::Disconnected) => Ok(()),
            Err(e) => Err(e),
        }
    }
    .instrument(span)
    .await
}

/// Handshake, register, replay, then feed lines to the dispatcher
async fn run_session<R>(
    state: &ServerState,
    connection: &Connection,
    lines: &mut LineReader<R>,
    registered: &mut Option<String>,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
{
    let account = match AuthSession::new(state.store.as_ref(), connection)
        .run(lines)
        .await?
    {
        AuthOutcome::Authenticated(account) => account,
        AuthOutcome::Rejected(reason) => {
            connection.close(Some(&reason));
            return Ok(());
        }
    };

    let login = account.login.clone();
    let room = {
        // Serialized with room commands so a room deleted during the handshake
        // is never the one we register into
        let _room_ops = state.room_ops.lock().await;
        let room = settle_room(state, &login).await;
        let client = Client::new(
            account.login,
            account.password_hash,
            Some(room.clone()),
            connection.clone(),
        );
        if let Some(previous) = state.registry.register(client).await {
            info!("{} reconnected, closing session {}", login, previous.session());
            previous.connection.close(Some(TAKEOVER_NOTICE));
        }
        room
    };
    *registered = Some(login.clone());
    info!("Client {} joined in room {}", login, room);

    match replay_history(state.store.as_ref(), connection, &room, state.history_limit).await {
        Ok(_) => {}
        Err(ReplayError::Send(e)) => return Err(e.into()),
        Err(ReplayError::Store(e)) => error!("Failed to load history of {}: {}", room, e),
    }
    connection.send_line(WELCOME).await?;

    loop {
        let line = lines.next_line().await?;
        match CommandDispatcher::new(state, &login, connection)
            .dispatch(&line)
            .await?
        {
            Dispatch::Continue => {}
            Dispatch::Persist(msg) => {
                if let Err(e) = state
                    .store
                    .append_message(&msg.sender, &msg.content, &msg.room, msg.sent_at)
                    .await
                {
                    error!("Failed to save message from {}: {}", msg.sender, e);
                    connection.send_line(INTERNAL_ERROR).await?;
                }
            }
            Dispatch::Exit => return Ok(()),
        }
    }
}

/// The room `login` should enter, read fresh from the store
///
/// Falls back to `global` when the stored room is gone or the store cannot
/// answer. Callers hold `room_ops`.
async fn settle_room(state: &ServerState, login: &str) -> String {
    let room = match state.store.get_account(login).await {
        Ok(account) => account.current_room,
        Err(e) => {
            error!("Failed to reload account {}: {}", login, e);
            return GLOBAL_ROOM.to_string();
        }
    };
    match state.store.room_exists(&room).await {
        Ok(true) => room,
        Ok(false) => {
            warn!("Room {} of {} no longer exists, using {}", room, login, GLOBAL_ROOM);
            if let Err(e) = state.store.set_current_room(login, GLOBAL_ROOM).await {
                error!("Failed to move {} to {}: {}", login, GLOBAL_ROOM, e);
            }
            GLOBAL_ROOM.to_string()
        }
        Err(e) => {
            error!("Failed to check room {}: {}", room, e);
            GLOBAL_ROOM.to_string()
        }
    }
}

/// Drain the outbound queue into the socket
///
/// On close, whatever is already queued is flushed before the write half
/// shuts down.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>, closer: Arc<Notify>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(text) => {
                    if let Err(e) = writer.write_all(text.as_bytes()).await {
                        debug!("Write failed, ending write task: {}", e);
                        return;
                    }
                }
                None => break,
            },
            _ = closer.notified() => {
                while let Ok(text) = rx.try_recv() {
                    if writer.write_all(text.as_bytes()).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    debug!("Write task ended");
}
