//! Command parsing and dispatch
//!
//! Turns one inbound line into a `Command`, runs it against the registry and
//! the store, and tells the connection loop what to do next.
//!
//! Checks run in a fixed order: name length, then existence, then ownership.
//! The first failing check answers with one line and mutates nothing.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::broadcast::{distribute, replay_history};
use crate::client::{Client, Connection};
use crate::error::{AppError, ReplayError, StoreError};
use crate::state::ServerState;
use crate::types::{RoomName, GLOBAL_ROOM, MAX_ROOM_NAME_LEN};

pub const HELP_TEXT: &str = "commands:\n\
/help - show this help\n\
/list - list rooms\n\
/room <name> - create and join room\n\
/join <name> - join room\n\
/deleteRoom <name> - delete a room you own\n\
/exit - exit chat";

pub const NO_ROOMS: &str = "no rooms yet, create one with /room <name>";
pub const NOT_OWNER: &str = "you are not the owner of this room";
pub const INTERNAL_ERROR: &str = "internal error, please try again";

fn name_length_error() -> String {
    format!("room name must be between 1 and {MAX_ROOM_NAME_LEN} characters")
}

/// Parsed inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    List,
    CreateRoom(String),
    Join(String),
    DeleteRoom(String),
    /// Anything that is not a command, sent to the caller's room
    Chat(String),
}

/// Split a line on its first space into `(command, argument)`
///
/// A line without a space has an empty command and is all argument.
pub fn split_line(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, argument)) => (command, argument),
        None => ("", line),
    }
}

impl Command {
    /// Parse a line whose trailing newline may or may not be stripped yet
    ///
    /// Bare command words only count when the line has no space at all, so
    /// ` /exit` is chat.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);
        if !line.contains(' ') {
            return match line {
                "/exit" => Command::Exit,
                "/help" => Command::Help,
                "/list" => Command::List,
                "/room" => Command::CreateRoom(String::new()),
                "/join" => Command::Join(String::new()),
                "/deleteRoom" => Command::DeleteRoom(String::new()),
                _ => Command::Chat(line.to_string()),
            };
        }
        match split_line(line) {
            ("/exit", _) => Command::Exit,
            ("/help", _) => Command::Help,
            ("/list", _) => Command::List,
            ("/room", name) => Command::CreateRoom(name.to_string()),
            ("/join", name) => Command::Join(name.to_string()),
            ("/deleteRoom", name) => Command::DeleteRoom(name.to_string()),
            _ => Command::Chat(line.to_string()),
        }
    }
}

/// Chat line the connection loop should hand to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub content: String,
    pub room: String,
    pub sent_at: DateTime<Utc>,
}

/// What the connection loop does after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Persist(ChatMessage),
    Exit,
}

/// Decision taken while `room_ops` is held
///
/// Replies wait on the caller's queue, so they are only sent after the guard
/// is released.
enum RoomStep<T> {
    Done(T),
    Refused(String),
    Failed(&'static str, StoreError),
}

/// Runs commands on behalf of one authenticated login
pub struct CommandDispatcher<'a> {
    state: &'a ServerState,
    login: &'a str,
    connection: &'a Connection,
}

impl<'a> CommandDispatcher<'a> {
    pub fn new(state: &'a ServerState, login: &'a str, connection: &'a Connection) -> Self {
        Self {
            state,
            login,
            connection,
        }
    }

    /// Execute one line
    ///
    /// Only a dead outbound queue is an error; everything else is answered
    /// on the connection and reported as `Continue`.
    pub async fn dispatch(&self, line: &str) -> Result<Dispatch, AppError> {
        match Command::parse(line) {
            Command::Exit => {
                info!("Client {} exit chat", self.login);
                Ok(Dispatch::Exit)
            }
            Command::Help => {
                self.reply(HELP_TEXT).await?;
                Ok(Dispatch::Continue)
            }
            Command::List => self.handle_list().await,
            Command::CreateRoom(name) => self.handle_create_room(&name).await,
            Command::Join(name) => self.handle_join(&name).await,
            Command::DeleteRoom(name) => self.handle_delete_room(&name).await,
            Command::Chat(text) => self.handle_chat(text).await,
        }
    }

    async fn reply(&self, line: impl AsRef<str>) -> Result<(), AppError> {
        self.connection.send_line(line).await?;
        Ok(())
    }

    /// Log a storage failure and tell the caller something went wrong
    async fn storage_failure(&self, op: &str, err: StoreError) -> Result<Dispatch, AppError> {
        error!("Storage failure during {} for {}: {}", op, self.login, err);
        self.reply(INTERNAL_ERROR).await?;
        Ok(Dispatch::Continue)
    }

    async fn replay(&self, room: &str) -> Result<(), AppError> {
        match replay_history(
            self.state.store.as_ref(),
            self.connection,
            room,
            self.state.history_limit,
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(ReplayError::Send(e)) => Err(e.into()),
            Err(ReplayError::Store(e)) => {
                error!("Failed to load history of {}: {}", room, e);
                Ok(())
            }
        }
    }

    async fn handle_list(&self) -> Result<Dispatch, AppError> {
        let rooms = match self.state.store.list_room_names().await {
            Ok(rooms) => rooms,
            Err(e) => return self.storage_failure("list", e).await,
        };
        if rooms.is_empty() {
            self.reply(NO_ROOMS).await?;
        } else {
            self.reply(rooms.join("\n")).await?;
        }
        Ok(Dispatch::Continue)
    }

    /// Answer a refused or failed room step; `None` when it went through
    async fn settle<T>(&self, step: RoomStep<T>) -> Result<Option<T>, AppError> {
        match step {
            RoomStep::Done(value) => Ok(Some(value)),
            RoomStep::Refused(line) => {
                self.reply(line).await?;
                Ok(None)
            }
            RoomStep::Failed(op, e) => {
                self.storage_failure(op, e).await?;
                Ok(None)
            }
        }
    }

    async fn handle_create_room(&self, raw: &str) -> Result<Dispatch, AppError> {
        let Some(name) = RoomName::parse(raw) else {
            self.reply(name_length_error()).await?;
            return Ok(Dispatch::Continue);
        };
        let step = {
            let _room_ops = self.state.room_ops.lock().await;
            self.create_room(&name).await
        };
        if self.settle(step).await?.is_none() {
            return Ok(Dispatch::Continue);
        }

        info!("{} created room {}", self.login, name);
        self.reply(format!("created room {name}")).await?;
        Ok(Dispatch::Continue)
    }

    async fn create_room(&self, name: &RoomName) -> RoomStep<()> {
        let store = self.state.store.as_ref();
        match store.room_exists(name.as_str()).await {
            Ok(false) => {}
            Ok(true) => return RoomStep::Refused(format!("room {name} already exists")),
            Err(e) => return RoomStep::Failed("create room", e),
        }
        match store.create_room(name.as_str(), self.login).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return RoomStep::Refused(format!("room {name} already exists"))
            }
            Err(e) => return RoomStep::Failed("create room", e),
        }
        if let Err(e) = store.set_current_room(self.login, name.as_str()).await {
            // Roll back: the creator was never moved in
            if let Err(undo) = store.delete_room(name.as_str()).await {
                error!("Failed to roll back room {}: {}", name, undo);
            }
            return RoomStep::Failed("create room", e);
        }
        self.state.registry.set_room(self.login, name.as_str()).await;
        RoomStep::Done(())
    }

    async fn handle_join(&self, raw: &str) -> Result<Dispatch, AppError> {
        let Some(name) = RoomName::parse(raw) else {
            self.reply(name_length_error()).await?;
            return Ok(Dispatch::Continue);
        };
        let step = {
            let _room_ops = self.state.room_ops.lock().await;
            self.join_room(&name).await
        };
        if self.settle(step).await?.is_none() {
            return Ok(Dispatch::Continue);
        }

        self.replay(name.as_str()).await?;
        info!("{} joined room {}", self.login, name);
        self.reply(format!("joined {name}")).await?;
        Ok(Dispatch::Continue)
    }

    async fn join_room(&self, name: &RoomName) -> RoomStep<()> {
        let store = self.state.store.as_ref();
        match store.room_exists(name.as_str()).await {
            Ok(true) => {}
            Ok(false) => return RoomStep::Refused(format!("room {name} does not exist")),
            Err(e) => return RoomStep::Failed("join", e),
        }
        if let Err(e) = store.set_current_room(self.login, name.as_str()).await {
            return RoomStep::Failed("join", e);
        }
        self.state.registry.set_room(self.login, name.as_str()).await;
        RoomStep::Done(())
    }

    async fn handle_delete_room(&self, raw: &str) -> Result<Dispatch, AppError> {
        let Some(name) = RoomName::parse(raw) else {
            self.reply(name_length_error()).await?;
            return Ok(Dispatch::Continue);
        };
        let step = {
            let _room_ops = self.state.room_ops.lock().await;
            self.delete_room(&name).await
        };
        let Some(moved) = self.settle(step).await? else {
            return Ok(Dispatch::Continue);
        };

        let notice = format!("room {name} was deleted, you are back in {GLOBAL_ROOM}");
        for member in moved.iter().filter(|m| m.login != self.login) {
            let _ = member.connection.try_send_line(&notice);
        }

        self.replay(GLOBAL_ROOM).await?;
        info!("{} deleted room {}", self.login, name);
        self.reply(format!("deleted room {name}")).await?;
        Ok(Dispatch::Continue)
    }

    /// Returns the members that were moved back to `global`
    async fn delete_room(&self, name: &RoomName) -> RoomStep<Vec<Client>> {
        let store = self.state.store.as_ref();
        match store.room_exists(name.as_str()).await {
            Ok(true) => {}
            Ok(false) => return RoomStep::Refused(format!("room {name} does not exist")),
            Err(e) => return RoomStep::Failed("delete room", e),
        }
        if name.is_global() {
            return RoomStep::Refused(format!("room {GLOBAL_ROOM} cannot be deleted"));
        }
        match store.get_room_owner(name.as_str()).await {
            Ok(owner) if owner == self.login => {}
            Ok(_) => return RoomStep::Refused(NOT_OWNER.to_string()),
            Err(e) => return RoomStep::Failed("delete room", e),
        }
        if let Err(e) = store.delete_room(name.as_str()).await {
            return RoomStep::Failed("delete room", e);
        }
        if let Err(e) = store.set_current_room(self.login, GLOBAL_ROOM).await {
            error!("Failed to move {} to {}: {}", self.login, GLOBAL_ROOM, e);
        }
        let moved = self
            .state
            .registry
            .reassign_room(name.as_str(), GLOBAL_ROOM)
            .await;
        self.state.registry.set_room(self.login, GLOBAL_ROOM).await;
        RoomStep::Done(moved)
    }

    async fn handle_chat(&self, text: String) -> Result<Dispatch, AppError> {
        if text.trim().is_empty() {
            return Ok(Dispatch::Continue);
        }
        // Not registered any more: this session was taken over
        let Some(room) = self.state.registry.current_room(self.login).await else {
            return Ok(Dispatch::Exit);
        };
        let sent_at = Utc::now();
        distribute(&self.state.registry, self.login, &text, &room, sent_at).await;
        Ok(Dispatch::Persist(ChatMessage {
            sender: self.login.to_string(),
            content: text,
            room,
            sent_at,
        }))
    }
}
