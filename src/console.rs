//! Administrative console
//!
//! Lines typed on the server's stdin. `/help`, `/who` and `/rooms` are local
//! commands; anything else is said in `global` as `server`.

use std::io::BufRead;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::broadcast::{distribute, format_time};
use crate::state::ServerState;
use crate::types::GLOBAL_ROOM;

/// Sender name used for console announcements
pub const CONSOLE_SENDER: &str = "server";

pub const CONSOLE_HELP: &str = "console commands:\n\
/help - this help\n\
/who - connected clients and their rooms\n\
/rooms - list rooms\n\
anything else is sent to global";

/// Read stdin on a plain thread and forward lines
///
/// Blocking stdin reads stay off the runtime, so they never hold up shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Process console lines until the input ends
pub async fn run_console<W>(state: Arc<ServerState>, mut input: mpsc::Receiver<String>, mut output: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = input.recv().await {
        let reply = handle_console_line(&state, line.trim_end()).await;
        if let Some(reply) = reply {
            if output.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                break;
            }
            let _ = output.flush().await;
        }
    }
    debug!("Console input closed");
}

/// One console line; returns text for the operator, if any
pub async fn handle_console_line(state: &ServerState, line: &str) -> Option<String> {
    match line {
        "" => None,
        "/help" => Some(CONSOLE_HELP.to_string()),
        "/who" => {
            let mut clients = state.registry.snapshot().await;
            if clients.is_empty() {
                return Some("nobody is connected".to_string());
            }
            clients.sort_by(|a, b| a.login.cmp(&b.login));
            let lines: Vec<String> = clients
                .iter()
                .map(|c| format!("{} ({})", c.login, c.current_room))
                .collect();
            Some(lines.join("\n"))
        }
        "/rooms" => match state.store.list_room_names().await {
            Ok(rooms) if rooms.is_empty() => Some("no rooms".to_string()),
            Ok(rooms) => Some(rooms.join("\n")),
            Err(e) => Some(format!("failed to list rooms: {e}")),
        },
        text if text.trim().is_empty() => None,
        text => {
            let sent_at = Utc::now();
            distribute(&state.registry, CONSOLE_SENDER, text, GLOBAL_ROOM, sent_at).await;
            if let Err(e) = state
                .store
                .append_message(CONSOLE_SENDER, text, GLOBAL_ROOM, sent_at)
                .await
            {
                error!("Failed to save console message: {}", e);
            }
            Some(format!("{} {CONSOLE_SENDER}: {text}", format_time(sent_at)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{test_connection, Client};
    use crate::store::{MemoryStore, Store};

    #[tokio::test]
    async fn test_console_announcement_reaches_global_only() {
        let store = Arc::new(MemoryStore::new());
        let state = ServerState::new(store.clone(), 500);
        let (a, mut a_rx, _) = test_connection(8);
        let (b, mut b_rx, _) = test_connection(8);
        state.registry.register(Client::new("a".into(), "h".into(), None, a)).await;
        state
            .registry
            .register(Client::new("b".into(), "h".into(), Some("den".into()), b))
            .await;

        let echo = handle_console_line(&state, "maintenance at noon").await.unwrap();

        assert!(echo.ends_with("server: maintenance at noon"));
        assert!(a_rx.try_recv().unwrap().contains("server: maintenance at noon"));
        assert!(b_rx.try_recv().is_err());
        let saved = store.recent_messages(GLOBAL_ROOM, 10).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].sender, CONSOLE_SENDER);
    }

    #[tokio::test]
    async fn test_console_who_and_rooms() {
        let store = Arc::new(MemoryStore::new());
        let state = ServerState::new(store.clone(), 500);

        assert_eq!(
            handle_console_line(&state, "/who").await.unwrap(),
            "nobody is connected"
        );
        assert_eq!(handle_console_line(&state, "/rooms").await.unwrap(), "no rooms");

        let (b, _b_rx, _) = test_connection(8);
        let (a, _a_rx, _) = test_connection(8);
        state
            .registry
            .register(Client::new("bob".into(), "h".into(), Some("den".into()), b))
            .await;
        state.registry.register(Client::new("alice".into(), "h".into(), None, a)).await;
        store.create_room("den", "bob").await.unwrap();

        assert_eq!(
            handle_console_line(&state, "/who").await.unwrap(),
            "alice (global)\nbob (den)"
        );
        assert_eq!(handle_console_line(&state, "/rooms").await.unwrap(), "den");
        assert!(handle_console_line(&state, "").await.is_none());
    }

    #[tokio::test]
    async fn test_run_console_writes_replies() {
        let state = ServerState::new(Arc::new(MemoryStore::new()), 500);
        let (tx, rx) = mpsc::channel(4);
        tx.send("/help".to_string()).await.unwrap();
        drop(tx);

        let mut output = Vec::new();
        run_console(state, rx, &mut output).await;

        assert_eq!(String::from_utf8(output).unwrap(), format!("{CONSOLE_HELP}\n"));
    }
}
