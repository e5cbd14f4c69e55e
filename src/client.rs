//! Client struct definition
//!
//! Represents an authenticated client and the outbound half of its connection.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::SendError;
use crate::types::{SessionId, GLOBAL_ROOM};

/// Outbound half of one connection
///
/// Cheap to clone. Every clone feeds the same queue, which a single writer
/// task drains, so lines from different tasks never interleave on the wire.
#[derive(Debug, Clone)]
pub struct Connection {
    session: SessionId,
    sender: mpsc::Sender<String>,
    closer: Arc<Notify>,
}

impl Connection {
    pub fn new(session: SessionId, sender: mpsc::Sender<String>, closer: Arc<Notify>) -> Self {
        Self {
            session,
            sender,
            closer,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queue raw text (used for prompts that must not end with a newline)
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.sender
            .send(text.into())
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Queue one line; the newline is appended here
    pub async fn send_line(&self, line: impl AsRef<str>) -> Result<(), SendError> {
        self.send_text(format!("{}\n", line.as_ref())).await
    }

    /// Queue one line without waiting for room in the queue
    ///
    /// Used for fan-out: a slow peer loses the line instead of stalling the sender.
    pub fn try_send_line(&self, line: &str) -> Result<(), SendError> {
        self.sender
            .try_send(format!("{line}\n"))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::ChannelFull,
                mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
            })
    }

    /// Queue an optional final notice, then tell the writer to hang up
    ///
    /// The writer flushes whatever is already queued before closing.
    pub fn close(&self, notice: Option<&str>) {
        if let Some(notice) = notice {
            let _ = self.try_send_line(notice);
        }
        self.closer.notify_one();
    }

    /// True once the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Authenticated client
///
/// `login` is the registry key and never changes. `current_room` is the only
/// field mutated after registration.
#[derive(Debug, Clone)]
pub struct Client {
    pub login: String,
    pub password_hash: String,
    pub current_room: String,
    pub connection: Connection,
}

impl Client {
    pub fn new(
        login: String,
        password_hash: String,
        current_room: Option<String>,
        connection: Connection,
    ) -> Self {
        Self {
            login,
            password_hash,
            current_room: current_room.unwrap_or_else(|| GLOBAL_ROOM.to_string()),
            connection,
        }
    }

    pub fn session(&self) -> SessionId {
        self.connection.session()
    }

    pub fn is_in(&self, room: &str) -> bool {
        self.current_room == room
    }
}

#[cfg(test)]
pub(crate) fn test_connection(capacity: usize) -> (Connection, mpsc::Receiver<String>, Arc<Notify>) {
    let (tx, rx) = mpsc::channel(capacity);
    let closer = Arc::new(Notify::new());
    (Connection::new(SessionId::new(), tx, closer.clone()), rx, closer)
}
