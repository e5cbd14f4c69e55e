//! Bounded line reading for the inbound half of a connection

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::AppError;

/// Longest accepted line, excluding the line terminator
pub const MAX_LINE_LEN: usize = 4096;

/// Reads newline-terminated UTF-8 lines with the terminator stripped
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buf: String,
    max_len: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_len(reader, MAX_LINE_LEN)
    }

    pub fn with_max_len(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: String::new(),
            max_len,
        }
    }

    /// Next line without its `\n` / `\r\n`
    ///
    /// EOF is `AppError::Disconnected`; an overlong line is `AppError::LineTooLong`.
    pub async fn next_line(&mut self) -> Result<String, AppError> {
        self.buf.clear();
        // room for "\r\n"
        let limit = (self.max_len + 2) as u64;
        let n = (&mut self.reader)
            .take(limit)
            .read_line(&mut self.buf)
            .await?;
        if n == 0 {
            return Err(AppError::Disconnected);
        }
        let line = self.buf.trim_end_matches(['\n', '\r']);
        if line.len() > self.max_len {
            return Err(AppError::LineTooLong(n));
        }
        Ok(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_strips_terminators() {
        let input: &[u8] = b"alice\nhunter2\r\n/exit";
        let mut lines = LineReader::new(BufReader::new(input));

        assert_eq!(lines.next_line().await.unwrap(), "alice");
        assert_eq!(lines.next_line().await.unwrap(), "hunter2");
        assert_eq!(lines.next_line().await.unwrap(), "/exit");
        assert!(matches!(lines.next_line().await, Err(AppError::Disconnected)));
    }

    #[tokio::test]
    async fn test_empty_line_is_not_eof() {
        let input: &[u8] = b"\n";
        let mut lines = LineReader::new(BufReader::new(input));

        assert_eq!(lines.next_line().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_rejects_overlong_line() {
        let input: &[u8] = b"0123456789\nok\n";
        let mut lines = LineReader::with_max_len(BufReader::new(input), 8);

        assert!(matches!(lines.next_line().await, Err(AppError::LineTooLong(_))));
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let input: &[u8] = b"12345678\r\n";
        let mut lines = LineReader::with_max_len(BufReader::new(input), 8);

        assert_eq!(lines.next_line().await.unwrap(), "12345678");
    }
}
