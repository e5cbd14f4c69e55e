//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based identifier of one accepted connection
//! - `RoomName`: validated room name (1 to 20 characters)

use uuid::Uuid;

/// The reserved room every client starts in. Always exists, never deleted.
pub const GLOBAL_ROOM: &str = "global";

/// Longest accepted room name, in characters
pub const MAX_ROOM_NAME_LEN: usize = 20;

/// Unique connection identifier (newtype pattern)
///
/// A login can reconnect; the session id tells the two connections apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name that passed the length check
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomName(String);

impl RoomName {
    /// Validate a user-supplied name. Surrounding whitespace is ignored.
    ///
    /// Returns `None` when the trimmed name is empty or longer than
    /// [`MAX_ROOM_NAME_LEN`] characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim();
        let len = name.chars().count();
        if len == 0 || len > MAX_ROOM_NAME_LEN {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_ROOM
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
