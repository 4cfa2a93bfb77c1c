//! SMTP command serialization.

use base64::Engine;

use crate::types::Address;

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// EHLO with the client identity.
    Ehlo(String),
    /// STARTTLS.
    StartTls,
    /// AUTH PLAIN with an initial response.
    AuthPlain {
        /// Authentication identity.
        username: String,
        /// Password.
        password: String,
    },
    /// MAIL FROM.
    MailFrom(Address),
    /// RCPT TO.
    RcptTo(Address),
    /// DATA.
    Data,
    /// QUIT.
    Quit,
}

impl Command {
    /// Serializes the command including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let line = match self {
            Self::Ehlo(host) => format!("EHLO {host}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::AuthPlain { username, password } => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("\0{username}\0{password}"));
                format!("AUTH PLAIN {token}")
            }
            Self::MailFrom(from) => format!("MAIL FROM:<{from}>"),
            Self::RcptTo(to) => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        };
        let mut buf = line.into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Normalizes line endings to CRLF and dot-stuffs lines, then appends the
/// terminating `.` line.
#[must_use]
pub fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 64);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
