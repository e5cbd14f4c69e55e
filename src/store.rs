//! Persistence collaborator
//!
//! `Store` is the narrow interface the core talks to for accounts, rooms and
//! message history. `MemoryStore` is the bundled implementation: volatile by
//! default, or backed by a JSON file rewritten after every mutation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::GLOBAL_ROOM;

/// `--database` value selecting the volatile store
pub const MEMORY_URL: &str = "memory";

/// Stored account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
    pub password_hash: String,
    pub current_room: String,
}

/// One replayable message, as returned by [`Store::recent_messages`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub content: String,
    pub room: String,
    pub sent_at: DateTime<Utc>,
}

/// Storage operations the chat core depends on
#[async_trait]
pub trait Store: Send + Sync {
    async fn account_exists(&self, login: &str) -> Result<bool, StoreError>;

    /// Create an account placed in `global`
    async fn create_account(&self, login: &str, password_hash: &str) -> Result<(), StoreError>;

    async fn get_account(&self, login: &str) -> Result<Account, StoreError>;

    async fn set_current_room(&self, login: &str, room: &str) -> Result<(), StoreError>;

    /// `global` always exists
    async fn room_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn get_room_owner(&self, name: &str) -> Result<String, StoreError>;

    async fn create_room(&self, name: &str, owner: &str) -> Result<(), StoreError>;

    /// Delete a room and move every account in it back to `global`
    async fn delete_room(&self, name: &str) -> Result<(), StoreError>;

    /// Names of user-created rooms (`global` is not listed)
    async fn list_room_names(&self) -> Result<Vec<String>, StoreError>;

    async fn append_message(
        &self,
        sender: &str,
        content: &str,
        room: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// The last `limit` messages of `room`, oldest first
    async fn recent_messages(&self, room: &str, limit: usize)
        -> Result<Vec<HistoryEntry>, StoreError>;

    /// Flush and refuse further calls
    async fn close(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RoomRecord {
    owner: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    accounts: HashMap<String, Account>,
    rooms: BTreeMap<String, RoomRecord>,
    messages: Vec<HistoryEntry>,
    #[serde(skip)]
    closed: bool,
}

/// In-process store, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Volatile store
    pub fn new() -> Self {
        Self::default()
    }

    /// File-backed store. A missing file starts empty and is created on first write.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Loaded store from {} ({} accounts, {} rooms, {} messages)",
            path.display(),
            data.accounts.len(),
            data.rooms.len(),
            data.messages.len()
        );
        Ok(Self {
            data: Mutex::new(data),
            path: Some(path),
        })
    }

    /// Pick the implementation from a `--database` value
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        if url == MEMORY_URL {
            info!("Using volatile in-memory store");
            Ok(Self::new())
        } else {
            Self::open(url).await
        }
    }

    /// Lock the data, failing once the store has been closed
    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, StoreData>, StoreError> {
        let data = self.data.lock().await;
        if data.closed {
            return Err(StoreError::Unavailable("store is closed".into()));
        }
        Ok(data)
    }

    async fn flush(&self, data: &StoreData) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(data)?;
            tokio::fs::write(path, json).await?;
            debug!("Store flushed to {}", path.display());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn account_exists(&self, login: &str) -> Result<bool, StoreError> {
        Ok(self.lock().await?.accounts.contains_key(login))
    }

    async fn create_account(&self, login: &str, password_hash: &str) -> Result<(), StoreError> {
        let mut data = self.lock().await?;
        if data.accounts.contains_key(login) {
            return Err(StoreError::AlreadyExists(login.to_string()));
        }
        data.accounts.insert(
            login.to_string(),
            Account {
                login: login.to_string(),
                password_hash: password_hash.to_string(),
                current_room: GLOBAL_ROOM.to_string(),
            },
        );
        self.flush(&data).await
    }

    async fn get_account(&self, login: &str) -> Result<Account, StoreError> {
        self.lock()
            .await?
            .accounts
            .get(login)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(login.to_string()))
    }

    async fn set_current_room(&self, login: &str, room: &str) -> Result<(), StoreError> {
        let mut data = self.lock().await?;
        let account = data
            .accounts
            .get_mut(login)
            .ok_or_else(|| StoreError::NotFound(login.to_string()))?;
        account.current_room = room.to_string();
        self.flush(&data).await
    }

    async fn room_exists(&self, name: &str) -> Result<bool, StoreError> {
        if name == GLOBAL_ROOM {
            return Ok(true);
        }
        Ok(self.lock().await?.rooms.contains_key(name))
    }

    async fn get_room_owner(&self, name: &str) -> Result<String, StoreError> {
        self.lock()
            .await?
            .rooms
            .get(name)
            .map(|r| r.owner.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn create_room(&self, name: &str, owner: &str) -> Result<(), StoreError> {
        let mut data = self.lock().await?;
        if name == GLOBAL_ROOM || data.rooms.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        data.rooms.insert(
            name.to_string(),
            RoomRecord {
                owner: owner.to_string(),
            },
        );
        self.flush(&data).await
    }

    async fn delete_room(&self, name: &str) -> Result<(), StoreError> {
        let mut data = self.lock().await?;
        if data.rooms.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        for account in data.accounts.values_mut() {
            if account.current_room == name {
                account.current_room = GLOBAL_ROOM.to_string();
            }
        }
        self.flush(&data).await
    }

    async fn list_room_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().await?.rooms.keys().cloned().collect())
    }

    async fn append_message(
        &self,
        sender: &str,
        content: &str,
        room: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut data = self.lock().await?;
        data.messages.push(HistoryEntry {
            sender: sender.to_string(),
            content: content.to_string(),
            room: room.to_string(),
            sent_at,
        });
        self.flush(&data).await
    }

    async fn recent_messages(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let data = self.lock().await?;
        let mut recent: Vec<HistoryEntry> = data
            .messages
            .iter()
            .rev()
            .filter(|m| m.room == room)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        if data.closed {
            return Ok(());
        }
        self.flush(&data).await?;
        data.closed = true;
        info!("Store closed");
        Ok(())
    }
}
