//! Multi-room TCP Chat Server Library
//!
//! A line-oriented chat service: clients connect over TCP, log in or
//! register, then talk in named rooms.
//!
//! # Features
//! - Login with password, or registration with confirmation
//! - Room creation, joining, listing and owner-only deletion
//! - Room-scoped broadcast with history replay on join
//! - Administrative console and graceful shutdown
//!
//! # Architecture
//! One task per connection plus one writer task per connection:
//! - `ClientRegistry` is the only shared mutable state (one `RwLock`)
//! - Every client's outbound lines go through an `mpsc` queue drained by
//!   its writer, so concurrent broadcasts never interleave mid-line
//! - Storage sits behind the `Store` trait
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tupochat::{ChatServer, MemoryStore, ServerState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:5522").await.unwrap();
//!     let state = ServerState::new(Arc::new(MemoryStore::new()), 500);
//!
//!     ChatServer::new(listener, state)
//!         .run(tupochat::server::shutdown_signal())
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod handler;
pub mod line;
pub mod password;
pub mod registry;
pub mod server;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use auth::{AuthOutcome, AuthSession, AuthState};
pub use client::{Client, Connection};
pub use command::{Command, CommandDispatcher, Dispatch};
pub use config::Config;
pub use error::{AppError, SendError, StoreError};
pub use handler::handle_connection;
pub use registry::ClientRegistry;
pub use server::ChatServer;
pub use state::ServerState;
pub use store::{MemoryStore, Store};
pub use types::{RoomName, SessionId, GLOBAL_ROOM};
