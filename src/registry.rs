//! Registry of connected, authenticated clients
//!
//! The only shared mutable state in the server. One `RwLock` guards the whole
//! map; no method holds it across an await point, so no socket I/O ever happens
//! under the lock. Callers get clones back and do their writes afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::client::Client;
use crate::types::SessionId;

/// Concurrent `login -> Client` map
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `client.login`
    ///
    /// Returns the replaced client when it belonged to a different session,
    /// so the caller can close the superseded connection.
    pub async fn register(&self, client: Client) -> Option<Client> {
        let session = client.session();
        let previous = self
            .clients
            .write()
            .await
            .insert(client.login.clone(), client);
        debug!("Registry size after register: {}", self.len().await);
        previous.filter(|old| old.session() != session)
    }

    /// Replace the stored value if the login is still registered
    pub async fn update(&self, client: Client) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&client.login) {
            Some(entry) => {
                *entry = client;
                true
            }
            None => false,
        }
    }

    /// Move one client to another room. Returns false when not registered.
    pub async fn set_room(&self, login: &str, room: &str) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(login) {
            Some(client) => {
                client.current_room = room.to_string();
                true
            }
            None => false,
        }
    }

    /// Move every member of `from` to `to`, returning the moved clients
    pub async fn reassign_room(&self, from: &str, to: &str) -> Vec<Client> {
        let mut clients = self.clients.write().await;
        let mut moved = Vec::new();
        for client in clients.values_mut().filter(|c| c.is_in(from)) {
            client.current_room = to.to_string();
            moved.push(client.clone());
        }
        moved
    }

    /// Remove the entry unconditionally
    pub async fn remove(&self, login: &str) -> Option<Client> {
        self.clients.write().await.remove(login)
    }

    /// Remove the entry only if it still belongs to `session`
    ///
    /// A reconnect replaces the entry; the old connection's teardown must not
    /// evict the new one.
    pub async fn remove_session(&self, login: &str, session: SessionId) -> Option<Client> {
        let mut clients = self.clients.write().await;
        match clients.get(login) {
            Some(client) if client.session() == session => clients.remove(login),
            _ => None,
        }
    }

    pub async fn get(&self, login: &str) -> Option<Client> {
        self.clients.read().await.get(login).cloned()
    }

    /// Room of a registered client
    pub async fn current_room(&self, login: &str) -> Option<String> {
        self.clients
            .read()
            .await
            .get(login)
            .map(|c| c.current_room.clone())
    }

    /// Point-in-time copy of every registered client
    pub async fn snapshot(&self) -> Vec<Client> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Point-in-time copy of the members of one room
    pub async fn members_of(&self, room: &str) -> Vec<Client> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.is_in(room))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_connection;

    fn client(login: &str, room: &str) -> Client {
        let (conn, _rx, _) = test_connection(4);
        Client::new(login.into(), "hash".into(), Some(room.into()), conn)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ClientRegistry::new();
        assert!(registry.register(client("alice", "global")).await.is_none());

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.current_room("alice").await.as_deref(), Some("global"));
        assert!(registry.get("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_register_returns_superseded_session() {
        let registry = ClientRegistry::new();
        let first = client("alice", "global");
        let first_session = first.session();
        registry.register(first.clone()).await;

        // same session re-registered is not a takeover
        assert!(registry.register(first).await.is_none());

        let replaced = registry.register(client("alice", "lobby")).await.unwrap();
        assert_eq!(replaced.session(), first_session);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.current_room("alice").await.as_deref(), Some("lobby"));
    }

    #[tokio::test]
    async fn test_remove_session_ignores_stale_session() {
        let registry = ClientRegistry::new();
        let old = client("alice", "global");
        let old_session = old.session();
        registry.register(old).await;
        registry.register(client("alice", "global")).await;

        assert!(registry.remove_session("alice", old_session).await.is_none());
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("alice").await.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_and_set_room() {
        let registry = ClientRegistry::new();
        let mut alice = client("alice", "global");
        registry.register(alice.clone()).await;

        alice.current_room = "lobby".into();
        assert!(registry.update(alice).await);
        assert_eq!(registry.current_room("alice").await.as_deref(), Some("lobby"));

        assert!(registry.set_room("alice", "den").await);
        assert_eq!(registry.current_room("alice").await.as_deref(), Some("den"));

        assert!(!registry.set_room("ghost", "den").await);
        assert!(!registry.update(client("ghost", "global")).await);
    }

    #[tokio::test]
    async fn test_reassign_room_moves_only_members() {
        let registry = ClientRegistry::new();
        registry.register(client("alice", "lobby")).await;
        registry.register(client("bob", "lobby")).await;
        registry.register(client("carol", "den")).await;

        let moved = registry.reassign_room("lobby", "global").await;

        assert_eq!(moved.len(), 2);
        assert_eq!(registry.members_of("global").await.len(), 2);
        assert!(registry.members_of("lobby").await.is_empty());
        assert_eq!(registry.current_room("carol").await.as_deref(), Some("den"));
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = ClientRegistry::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(client(&format!("user{i}"), "global")).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.snapshot().await.len(), 32);
    }
}
