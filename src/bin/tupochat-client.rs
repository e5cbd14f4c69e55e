//! Line client for the chat server
//!
//! Forwards stdin to the server line by line and prints everything the server
//! sends. `/exit` or the end of stdin quits.

use clap::Parser;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tupochat::config::DEFAULT_PORT;
use tupochat::console::spawn_stdin_reader;

const EXIT_COMMAND: &str = "/exit";

#[derive(Debug, Clone, Parser)]
#[command(name = "tupochat-client", version, about = "Line client for tupochat")]
struct ClientConfig {
    /// Server host
    #[arg(long, env = "TUPOCHAT_SERVER", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, env = "TUPOCHAT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl ClientConfig {
    fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Send typed lines until `/exit` or end of input
///
/// `/exit` is forwarded too so the server ends the session itself.
async fn forward_input<W>(mut input: mpsc::Receiver<String>, mut server: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = input.recv().await {
        let line = line.trim_end_matches(['\n', '\r']);
        server.write_all(format!("{line}\n").as_bytes()).await?;
        if line == EXIT_COMMAND {
            break;
        }
    }
    server.shutdown().await
}

/// Copy server output to `out` until the server hangs up
///
/// Prompts come without a trailing newline, so output is flushed per read.
async fn print_output<R, W>(mut server: R, mut out: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = server.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        out.write_all(&buf[..n]).await?;
        out.flush().await?;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Quiet by default; the terminal belongs to the chat
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = ClientConfig::parse();
    let stream = TcpStream::connect(config.server_addr()).await?;
    info!("Connected to {}", config.server_addr());

    let (read_half, write_half) = tokio::io::split(stream);
    let mut printer = tokio::spawn(print_output(read_half, tokio::io::stdout()));

    tokio::select! {
        res = forward_input(spawn_stdin_reader(), write_half) => res?,
        res = &mut printer => {
            debug!("Reader finished: {:?}", res);
            eprintln!("disconnected from server");
            return Ok(());
        }
    }

    // The server hangs up after /exit; let its last lines through first
    let _ = printer.await;
    println!("Exiting...");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_stops_at_exit() {
        let (tx, rx) = mpsc::channel(8);
        for line in ["hello", "/room lobby\r", "/exit", "never sent"] {
            tx.send(line.to_string()).await.unwrap();
        }
        let (client, mut server) = tokio::io::duplex(1024);

        forward_input(rx, client).await.unwrap();

        let mut sent = String::new();
        server.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "hello\n/room lobby\n/exit\n");
    }

    #[tokio::test]
    async fn test_forward_ends_with_input() {
        let (tx, rx) = mpsc::channel(8);
        tx.send("bye".to_string()).await.unwrap();
        drop(tx);
        let (client, mut server) = tokio::io::duplex(1024);

        forward_input(rx, client).await.unwrap();

        let mut sent = String::new();
        server.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "bye\n");
    }

    #[tokio::test]
    async fn test_print_output_copies_prompts() {
        let (mut server, client) = tokio::io::duplex(1024);
        server.write_all(b"Login: ").await.unwrap();
        server.write_all(b"hello\n").await.unwrap();
        drop(server);
        let mut out = Vec::new();

        print_output(client, &mut out).await.unwrap();

        assert_eq!(out, b"Login: hello\n");
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::try_parse_from(["tupochat-client"]).unwrap();
        assert_eq!(config.server_addr(), format!("127.0.0.1:{DEFAULT_PORT}"));

        let config =
            ClientConfig::try_parse_from(["tupochat-client", "--host", "chat.local", "-p", "7000"])
                .unwrap();
        assert_eq!(config.server_addr(), "chat.local:7000");
    }
}
