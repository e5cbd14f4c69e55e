//! Error types for the chat server
//!
//! Splits failures by blast radius: `StoreError` for the persistence
//! collaborator, `AppError` for whatever ends a single connection.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Connection-level errors
///
/// Any of these terminates the connection that produced it and nothing else.
#[derive(Debug, Error)]
pub enum AppError {
    /// Socket read/write failure (fatal for the connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage failure that could not be reported as a reply line
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Peer closed the stream
    #[error("Peer disconnected")]
    Disconnected,

    /// Outbound queue is gone (writer task ended)
    #[error("Channel send error")]
    ChannelSend,

    /// Incoming line exceeded the configured cap
    #[error("Line too long ({0} bytes)")]
    LineTooLong(usize),
}

impl From<SendError> for AppError {
    fn from(_: SendError) -> Self {
        AppError::ChannelSend
    }
}

/// Persistence collaborator errors
///
/// Recoverable from the point of view of a session: the caller gets a
/// generic failure line and keeps going.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Account or room lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique key already taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Backend cannot serve requests (closed, poisoned, unreachable)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backing file could not be read or written
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file is not valid JSON
    #[error("Storage format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message send errors
///
/// Occurs when attempting to queue a line for a connection whose writer is gone.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The queue is full (slow peer); only returned by non-blocking sends
    #[error("Channel full")]
    ChannelFull,
}

/// History replay can fail on either side
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Send(#[from] SendError),
}
