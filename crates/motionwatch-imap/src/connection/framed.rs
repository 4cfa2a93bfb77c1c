//! Line framing with inline literals.
//!
//! A response is one CRLF-terminated line, unless the line ends in a literal
//! marker `{n}`, in which case the next `n` bytes and the following line are
//! part of the same response.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::parser::{Response, ResponseParser};
use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound for a single line outside literals.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Upper bound for a single literal. Camera snapshots are well below this.
const MAX_LITERAL_SIZE: usize = 64 * 1024 * 1024;

/// Buffered, response-framed IMAP stream.
pub struct FramedStream<S> {
    reader: BufReader<S>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
        }
    }

    /// Reads one complete response, inlining any literals.
    ///
    /// # Errors
    ///
    /// Returns an error on EOF, I/O failure, or an oversized line or literal.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        loop {
            let line = self.read_line().await?;
            response.extend_from_slice(&line);

            let Some(len) = literal_length(&line) else {
                return Ok(response);
            };
            if len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal of {len} bytes exceeds {MAX_LITERAL_SIZE}"
                )));
            }
            let start = response.len();
            response.resize(start + len, 0);
            self.reader.read_exact(&mut response[start..]).await?;
        }
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }

            // A CR at the end of `buf` may pair with an LF in the next fill.
            let joined_crlf = line.last() == Some(&b'\r') && buf[0] == b'\n';
            if joined_crlf {
                line.push(b'\n');
                self.reader.consume(1);
                return Ok(line);
            }

            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                return Ok(line);
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);
            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("response line too long".into()));
            }
        }
    }

    /// Writes a serialized command and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_command(&mut self, command: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(command).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads and parses responses until the tagged completion for `tag`.
    ///
    /// The returned vector always ends with the tagged response. Untagged
    /// `BYE` is surfaced as [`Error::Bye`] immediately.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, a malformed response, or `BYE`.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Response>> {
        let mut responses = Vec::new();
        loop {
            let raw = self.read_response().await?;
            tracing::trace!(len = raw.len(), "IMAP response");
            let response = ResponseParser::parse(&raw)?;

            if let Response::Untagged(crate::parser::Untagged::Condition {
                status: crate::parser::Status::Bye,
                text,
                ..
            }) = &response
            {
                return Err(Error::Bye(text.clone()));
            }

            let done = matches!(&response, Response::Tagged { tag: t, .. } if t == tag);
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    /// Returns the inner stream.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

/// Parses a trailing `{n}` or `{n+}` literal marker.
fn literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn test_literal_length() {
        assert_eq!(literal_length(b"BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_length(b"{7+}\r\n"), Some(7));
        assert_eq!(literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(literal_length(b"A1 OK done\r\n"), None);
        assert_eq!(literal_length(b"{12}"), None);
        assert_eq!(literal_length(b"{x}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_literal_spanning_reads() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (UID 5 BODY[] {5}\r\n")
            .read(b"hel")
            .read(b"lo)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (UID 5 BODY[] {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_oversized_literal_rejected() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_eof_is_connection_error() {
        let mock = Builder::new().read(b"* OK partial").build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_read_until_tagged_collects_untagged() {
        let mock = Builder::new()
            .read(b"* SEARCH 4 8\r\n")
            .read(b"A0003 OK SEARCH completed\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let responses = framed.read_until_tagged("A0003").await.unwrap();
        assert_eq!(responses.len(), 2);
        assert!(matches!(responses[1], Response::Tagged { .. }));
    }

    #[tokio::test]
    async fn test_read_until_tagged_stops_on_bye() {
        let mock = Builder::new().read(b"* BYE idle timeout\r\n").build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_until_tagged("A0001").await.unwrap_err();
        assert!(matches!(err, Error::Bye(ref text) if text == "idle timeout"));
    }
}
