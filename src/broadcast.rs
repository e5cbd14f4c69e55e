//! Room-scoped fan-out and history rendering

use chrono::{DateTime, Local, Utc};
use tracing::{debug, warn};

use crate::client::Connection;
use crate::error::{ReplayError, SendError};
use crate::registry::ClientRegistry;
use crate::store::{HistoryEntry, Store};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(TIME_FORMAT).to_string()
}

/// `<room> -- <time> -- <sender>: <text>`
pub fn render_broadcast(room: &str, at: DateTime<Utc>, sender: &str, text: &str) -> String {
    format!("{room} -- {} -- {sender}: {text}", format_time(at))
}

/// `<time> <sender>: <content>`
pub fn render_history(entry: &HistoryEntry) -> String {
    format!(
        "{} {}: {}",
        format_time(entry.sent_at),
        entry.sender,
        entry.content
    )
}

/// Deliver one line to every registered member of `room`, sender included
///
/// Works on a registry snapshot and never waits on a peer: a full or closed
/// queue loses this line and the next recipient is tried. Returns how many
/// clients accepted it.
pub async fn distribute(
    registry: &ClientRegistry,
    sender: &str,
    text: &str,
    room: &str,
    at: DateTime<Utc>,
) -> usize {
    let line = render_broadcast(room, at, sender, text);
    let members = registry.members_of(room).await;

    let mut delivered = 0;
    for member in &members {
        match member.connection.try_send_line(&line) {
            Ok(()) => delivered += 1,
            Err(SendError::ChannelFull) => {
                warn!("Dropped broadcast to slow client {}", member.login);
            }
            Err(SendError::ChannelClosed) => {
                debug!("Skipped broadcast to closing client {}", member.login);
            }
        }
    }
    debug!("Broadcast in {} reached {}/{}", room, delivered, members.len());
    delivered
}

/// Send the recent history of `room` to one connection
pub async fn replay_history(
    store: &dyn Store,
    connection: &Connection,
    room: &str,
    limit: usize,
) -> Result<usize, ReplayError> {
    let entries = store.recent_messages(room, limit).await?;
    for entry in &entries {
        connection.send_line(render_history(entry)).await?;
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{test_connection, Client};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_distribute_stays_in_room() {
        let registry = ClientRegistry::new();
        let (a, mut a_rx, _) = test_connection(8);
        let (b, mut b_rx, _) = test_connection(8);
        let (c, mut c_rx, _) = test_connection(8);
        registry.register(Client::new("a".into(), "h".into(), Some("lobby".into()), a)).await;
        registry.register(Client::new("b".into(), "h".into(), Some("lobby".into()), b)).await;
        registry.register(Client::new("c".into(), "h".into(), None, c)).await;

        let delivered = distribute(&registry, "a", "hello", "lobby", Utc::now()).await;

        assert_eq!(delivered, 2);
        let line = b_rx.try_recv().unwrap();
        assert!(line.starts_with("lobby -- "));
        assert!(line.ends_with(" -- a: hello\n"));
        assert_eq!(a_rx.try_recv().unwrap(), line);
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_distribute_survives_dead_and_slow_peers() {
        let registry = ClientRegistry::new();
        let (dead, dead_rx, _) = test_connection(8);
        let (slow, _slow_rx, _) = test_connection(1);
        let (ok, mut ok_rx, _) = test_connection(8);
        drop(dead_rx);
        slow.try_send_line("backlog").unwrap();
        registry.register(Client::new("dead".into(), "h".into(), None, dead)).await;
        registry.register(Client::new("slow".into(), "h".into(), None, slow)).await;
        registry.register(Client::new("ok".into(), "h".into(), None, ok)).await;

        let delivered = distribute(&registry, "server", "ping", "global", Utc::now()).await;

        assert_eq!(delivered, 1);
        assert!(ok_rx.try_recv().unwrap().contains("server: ping"));
    }

    #[tokio::test]
    async fn test_replay_history_sends_in_order() {
        let store = MemoryStore::new();
        let t = Utc::now();
        store.append_message("a", "first", "lobby", t).await.unwrap();
        store.append_message("b", "second", "lobby", t).await.unwrap();
        let (conn, mut rx, _) = test_connection(8);

        let sent = replay_history(&store, &conn, "lobby", 500).await.unwrap();

        assert_eq!(sent, 2);
        assert!(rx.recv().await.unwrap().ends_with(" a: first\n"));
        assert!(rx.recv().await.unwrap().ends_with(" b: second\n"));
    }

    #[test]
    fn test_render_formats() {
        let at = Utc::now();
        let line = render_broadcast("lobby", at, "alice", "hi there");
        assert!(line.starts_with("lobby -- "));
        assert!(line.ends_with(" -- alice: hi there"));

        let entry = HistoryEntry {
            sender: "alice".into(),
            content: "hi".into(),
            room: "lobby".into(),
            sent_at: at,
        };
        // "YYYY-MM-DD HH:MM:SS alice: hi"
        let rendered = render_history(&entry);
        assert_eq!(rendered.len(), 19 + " alice: hi".len());
    }
}
