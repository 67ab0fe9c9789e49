use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Largest bulk string a client may send
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest number of arguments in one command
const MAX_ARGS: usize = 1024 * 1024;

/// Longest inline command or header line, terminator included
const MAX_LINE_LEN: usize = 64 * 1024;

pub struct RespReader<R> {
    reader: BufReader<R>,
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("Protocol error: {}", msg))
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read one command: a RESP array of bulk strings, or an inline
    /// whitespace-separated line as sent by telnet-style clients.
    /// Returns `Ok(None)` on a clean EOF.
    pub async fn read_command(&mut self) -> io::Result<Option<Vec<Vec<u8>>>> {
        loop {
            let line = match self.read_line().await? {
                Some(line) => line,
                None => return Ok(None),
            };

            if let Some(count) = line.strip_prefix(b"*") {
                let count = parse_len(count, "invalid multibulk length")?;
                if count > MAX_ARGS {
                    return Err(protocol_error("invalid multibulk length"));
                }

                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(self.read_bulk_string().await?);
                }
                return Ok(Some(args));
            }

            let args: Vec<Vec<u8>> = line
                .split(|b| b.is_ascii_whitespace())
                .filter(|word| !word.is_empty())
                .map(|word| word.to_vec())
                .collect();
            // blank lines are skipped
            if !args.is_empty() {
                return Ok(Some(args));
            }
        }
    }

    /// One CRLF (or bare LF) terminated line without its terminator
    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ));
            }

            let (take, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if line.len() + take > MAX_LINE_LEN {
                return Err(protocol_error("too big inline request"));
            }
            line.extend_from_slice(&available[..take]);
            self.reader.consume(take);

            if complete {
                break;
            }
        }

        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn read_bulk_string(&mut self) -> io::Result<Vec<u8>> {
        let line = self
            .read_line()
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "missing bulk string"))?;

        let len = match line.strip_prefix(b"$") {
            Some(len) => parse_len(len, "invalid bulk length")?,
            None => return Err(protocol_error("expected '$'")),
        };
        if len > MAX_BULK_LEN {
            return Err(protocol_error("invalid bulk length"));
        }

        let mut data = vec![0u8; len + 2]; // +2 for \r\n
        self.reader.read_exact(&mut data).await?;
        if &data[len..] != b"\r\n" {
            return Err(protocol_error("bulk string not terminated by CRLF"));
        }

        data.truncate(len);
        Ok(data)
    }
}

fn parse_len(digits: &[u8], msg: &str) -> io::Result<usize> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol_error(msg))
}
