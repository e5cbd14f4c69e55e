//! Command line / environment configuration

use clap::Parser;

use crate::state::DEFAULT_HISTORY_LIMIT;
use crate::store::MEMORY_URL;

/// Default listen port
pub const DEFAULT_PORT: u16 = 5522;

#[derive(Debug, Clone, Parser)]
#[command(name = "tupochat", version, about = "Multi-room line-oriented TCP chat server")]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "TUPOCHAT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "TUPOCHAT_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// `memory` for a volatile store, otherwise a JSON file path
    #[arg(long, env = "DATABASE_URL", default_value = MEMORY_URL)]
    pub database: String,

    /// Messages replayed when entering a room
    #[arg(long, env = "TUPOCHAT_HISTORY_LIMIT", default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,

    /// Do not read administrative commands from stdin
    #[arg(long)]
    pub no_console: bool,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
