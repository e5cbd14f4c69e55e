//! Shared server context
//!
//! One `Arc<ServerState>` is handed to every connection task, the console and
//! the shutdown path.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::registry::ClientRegistry;
use crate::store::Store;

/// Default number of messages replayed on join
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

pub struct ServerState {
    pub registry: ClientRegistry,
    pub store: Arc<dyn Store>,
    /// Serializes room create/join/delete across sessions. Never the registry lock.
    pub room_ops: Mutex<()>,
    pub history_limit: usize,
}

impl ServerState {
    pub fn new(store: Arc<dyn Store>, history_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: ClientRegistry::new(),
            store,
            room_ops: Mutex::new(()),
            history_limit,
        })
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("registry", &self.registry)
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}
