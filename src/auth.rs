//! Login / registration handshake
//!
//! An explicit state machine run once per connection before the client is
//! registered. Each non-terminal state has one prompt; every inbound line
//! drives exactly one transition.
//!
//! ```text
//! AwaitLogin ──known──▶ AwaitPassword ──match──▶ Authenticated
//!      │                     └─3rd miss─▶ Rejected
//!      └──new──▶ AwaitNewPassword ──▶ AwaitConfirm ──match──▶ Authenticated
//!                     └─3rd empty─▶ Rejected   └─3rd miss─▶ Rejected
//! ```

use tokio::io::AsyncBufRead;
use tracing::{error, info, warn};

use crate::client::Connection;
use crate::error::{AppError, StoreError};
use crate::line::LineReader;
use crate::password::{hash_password, verify_password};
use crate::store::{Account, Store};
use crate::types::GLOBAL_ROOM;

/// Attempts allowed per step (login, password, confirmation)
pub const MAX_ATTEMPTS: u32 = 3;

pub const LOGIN_PROMPT: &str = "Login: ";
pub const PASSWORD_PROMPT: &str = "Password: ";
pub const CONFIRM_PROMPT: &str = "Confirm password: ";

/// Handshake state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    AwaitLogin {
        attempts: u32,
    },
    AwaitPassword {
        account: Account,
        attempts: u32,
    },
    AwaitNewPassword {
        login: String,
        attempts: u32,
    },
    AwaitConfirm {
        login: String,
        password: String,
        attempts: u32,
    },
    Authenticated(Account),
    /// Carries the closing notice
    Rejected(String),
}

impl AuthState {
    pub fn start() -> Self {
        AuthState::AwaitLogin { attempts: 0 }
    }

    pub fn prompt(&self) -> Option<&'static str> {
        match self {
            AuthState::AwaitLogin { .. } => Some(LOGIN_PROMPT),
            AuthState::AwaitPassword { .. } | AuthState::AwaitNewPassword { .. } => {
                Some(PASSWORD_PROMPT)
            }
            AuthState::AwaitConfirm { .. } => Some(CONFIRM_PROMPT),
            AuthState::Authenticated(_) | AuthState::Rejected(_) => None,
        }
    }
}

/// Result of a finished handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Account),
    Rejected(String),
}

/// Drives [`AuthState`] over one connection
pub struct AuthSession<'a> {
    store: &'a dyn Store,
    connection: &'a Connection,
}

impl<'a> AuthSession<'a> {
    pub fn new(store: &'a dyn Store, connection: &'a Connection) -> Self {
        Self { store, connection }
    }

    /// Prompt, read, transition until a terminal state
    ///
    /// Transport failures (including EOF) end the handshake with `Err`.
    pub async fn run<R>(&self, lines: &mut LineReader<R>) -> Result<AuthOutcome, AppError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut state = AuthState::start();
        loop {
            let prompt = match state {
                AuthState::Authenticated(account) => {
                    info!("{} authenticated", account.login);
                    return Ok(AuthOutcome::Authenticated(account));
                }
                AuthState::Rejected(reason) => {
                    warn!("Authentication rejected: {}", reason);
                    return Ok(AuthOutcome::Rejected(reason));
                }
                ref waiting => waiting.prompt(),
            };
            if let Some(prompt) = prompt {
                self.connection.send_text(prompt).await?;
            }
            let input = lines.next_line().await?;
            state = self.advance(state, input).await?;
        }
    }

    /// One transition
    pub async fn advance(&self, state: AuthState, input: String) -> Result<AuthState, AppError> {
        match state {
            AuthState::AwaitLogin { attempts } => self.on_login(attempts, input).await,
            AuthState::AwaitPassword { account, attempts } => {
                if verify_password(&input, &account.password_hash) {
                    return Ok(AuthState::Authenticated(account));
                }
                let attempts = attempts + 1;
                if attempts >= MAX_ATTEMPTS {
                    return Ok(AuthState::Rejected(
                        "password is incorrect, too many attempts".into(),
                    ));
                }
                self.say("password is incorrect, try again").await?;
                Ok(AuthState::AwaitPassword { account, attempts })
            }
            AuthState::AwaitNewPassword { login, attempts } => {
                if input.is_empty() {
                    let attempts = attempts + 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Ok(AuthState::Rejected(
                            "password must not be empty, too many attempts".into(),
                        ));
                    }
                    self.say("password must not be empty").await?;
                    return Ok(AuthState::AwaitNewPassword { login, attempts });
                }
                Ok(AuthState::AwaitConfirm {
                    login,
                    password: input,
                    attempts: 0,
                })
            }
            AuthState::AwaitConfirm {
                login,
                password,
                attempts,
            } => {
                if input == password {
                    return self.create_account(login, &password).await;
                }
                let attempts = attempts + 1;
                if attempts >= MAX_ATTEMPTS {
                    return Ok(AuthState::Rejected(
                        "passwords do not match, too many attempts".into(),
                    ));
                }
                self.say("passwords do not match, try again").await?;
                Ok(AuthState::AwaitConfirm {
                    login,
                    password,
                    attempts,
                })
            }
            terminal => Ok(terminal),
        }
    }

    async fn say(&self, line: &str) -> Result<(), AppError> {
        self.connection.send_line(line).await?;
        Ok(())
    }

    async fn on_login(&self, attempts: u32, login: String) -> Result<AuthState, AppError> {
        let login = login.trim().to_string();
        if login.is_empty() || login.contains(char::is_whitespace) {
            let attempts = attempts + 1;
            if attempts >= MAX_ATTEMPTS {
                return Ok(AuthState::Rejected("invalid login, too many attempts".into()));
            }
            self.say("login must be a single non-empty word").await?;
            return Ok(AuthState::AwaitLogin { attempts });
        }

        let exists = match self.store.account_exists(&login).await {
            Ok(exists) => exists,
            Err(e) => return Ok(storage_rejection(e)),
        };
        if !exists {
            self.say("login not found, creating new user").await?;
            return Ok(AuthState::AwaitNewPassword { login, attempts: 0 });
        }
        match self.store.get_account(&login).await {
            Ok(account) => Ok(AuthState::AwaitPassword {
                account,
                attempts: 0,
            }),
            Err(e) => Ok(storage_rejection(e)),
        }
    }

    async fn create_account(&self, login: String, password: &str) -> Result<AuthState, AppError> {
        let password_hash = hash_password(password);
        match self.store.create_account(&login, &password_hash).await {
            Ok(()) => {
                info!("Registered new account {}", login);
                Ok(AuthState::Authenticated(Account {
                    login,
                    password_hash,
                    current_room: GLOBAL_ROOM.to_string(),
                }))
            }
            Err(StoreError::AlreadyExists(_)) => Ok(AuthState::Rejected(format!(
                "login {login} was registered by someone else meanwhile"
            ))),
            Err(e) => Ok(storage_rejection(e)),
        }
    }
}

fn storage_rejection(err: StoreError) -> AuthState {
    error!("Storage failure during authentication: {}", err);
    AuthState::Rejected("internal error, please try again later".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_connection;
    use crate::store::MemoryStore;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<String>) -> String {
        let mut out = String::new();
        while let Ok(text) = rx.try_recv() {
            out.push_str(&text);
        }
        out
    }

    async fn run_with(store: &MemoryStore, input: &'static [u8]) -> (Result<AuthOutcome, AppError>, String) {
        let (conn, mut rx, _) = test_connection(64);
        let mut lines = LineReader::new(BufReader::new(input));
        let outcome = AuthSession::new(store, &conn).run(&mut lines).await;
        (outcome, drain(&mut rx))
    }

    #[tokio::test]
    async fn test_register_new_account() {
        let store = MemoryStore::new();

        let (outcome, output) = run_with(&store, b"alice\nhunter2\nhunter2\n").await;

        let AuthOutcome::Authenticated(account) = outcome.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(account.login, "alice");
        assert_eq!(account.current_room, GLOBAL_ROOM);
        assert_eq!(account.password_hash, hash_password("hunter2"));
        assert_eq!(
            output,
            "Login: login not found, creating new user\nPassword: Confirm password: "
        );
        assert_eq!(store.get_account("alice").await.unwrap(), account);
    }

    #[tokio::test]
    async fn test_confirmation_retry_then_success() {
        let store = MemoryStore::new();

        let (outcome, output) = run_with(&store, b"alice\npw\nnope\nnope\npw\n").await;

        assert!(matches!(outcome.unwrap(), AuthOutcome::Authenticated(_)));
        assert_eq!(output.matches(CONFIRM_PROMPT).count(), 3);
    }

    #[tokio::test]
    async fn test_confirmation_exhausted() {
        let store = MemoryStore::new();

        let (outcome, output) = run_with(&store, b"alice\npw\na\nb\nc\npw\n").await;

        assert!(matches!(outcome.unwrap(), AuthOutcome::Rejected(_)));
        assert_eq!(output.matches(CONFIRM_PROMPT).count(), 3);
        assert!(!store.account_exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_new_passwords_are_bounded() {
        let store = MemoryStore::new();

        let (outcome, output) = run_with(&store, b"alice\n\n\n\npw\npw\n").await;

        assert_eq!(
            outcome.unwrap(),
            AuthOutcome::Rejected("password must not be empty, too many attempts".into())
        );
        assert_eq!(output.matches(PASSWORD_PROMPT).count(), 3);
        assert!(!store.account_exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_new_password_reprompts() {
        let store = MemoryStore::new();

        let (outcome, output) = run_with(&store, b"alice\n\npw\npw\n").await;

        assert!(matches!(outcome.unwrap(), AuthOutcome::Authenticated(_)));
        assert!(output.contains("password must not be empty\nPassword: "));
    }

    #[tokio::test]
    async fn test_existing_account_login() {
        let store = MemoryStore::new();
        store
            .create_account("alice", &hash_password("hunter2"))
            .await
            .unwrap();
        store.create_room("lobby", "alice").await.unwrap();
        store.set_current_room("alice", "lobby").await.unwrap();

        let (outcome, output) = run_with(&store, b"alice\nwrong\nhunter2\n").await;

        let AuthOutcome::Authenticated(account) = outcome.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(account.current_room, "lobby");
        assert_eq!(
            output,
            "Login: Password: password is incorrect, try again\nPassword: "
        );
    }

    #[tokio::test]
    async fn test_three_wrong_passwords_reject_without_fourth_prompt() {
        let store = MemoryStore::new();
        store
            .create_account("alice", &hash_password("hunter2"))
            .await
            .unwrap();

        let (outcome, output) = run_with(&store, b"alice\na\nb\nc\nhunter2\n").await;

        assert!(matches!(outcome.unwrap(), AuthOutcome::Rejected(_)));
        assert_eq!(output.matches(PASSWORD_PROMPT).count(), 3);
    }

    #[tokio::test]
    async fn test_blank_login_reprompts() {
        let store = MemoryStore::new();

        let (outcome, output) = run_with(&store, b"\n  \nbad name\n").await;

        assert!(matches!(outcome.unwrap(), AuthOutcome::Rejected(_)));
        assert_eq!(output.matches(LOGIN_PROMPT).count(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_mid_handshake() {
        let store = MemoryStore::new();

        let (outcome, _) = run_with(&store, b"alice\n").await;

        assert!(matches!(outcome, Err(AppError::Disconnected)));
    }

    #[tokio::test]
    async fn test_storage_failure_rejects() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        let (outcome, _) = run_with(&store, b"alice\n").await;

        assert_eq!(
            outcome.unwrap(),
            AuthOutcome::Rejected("internal error, please try again later".into())
        );
    }

    #[tokio::test]
    async fn test_advance_is_identity_on_terminal_states() {
        let store = MemoryStore::new();
        let (conn, _rx, _) = test_connection(4);
        let session = AuthSession::new(&store, &conn);

        let rejected = AuthState::Rejected("x".into());
        assert_eq!(
            session.advance(rejected.clone(), "y".into()).await.unwrap(),
            rejected
        );
        assert_eq!(rejected.prompt(), None);
    }
}
