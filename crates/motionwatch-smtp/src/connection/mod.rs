//! Connection setup.

mod client;
mod stream;

use std::str::FromStr;

pub use client::{Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded};
pub use stream::{SmtpStream, connect_tcp, wrap_tls};

use crate::error::{Error, Result};

/// How the session is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// TLS from the first byte (port 465).
    #[default]
    Implicit,
    /// Plain connect, then STARTTLS (port 587).
    StartTls,
    /// No TLS. Only for local relays and tests.
    None,
}

impl FromStr for Security {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "ssl" | "tls" => Ok(Self::Implicit),
            "starttls" => Ok(Self::StartTls),
            "none" | "plain" => Ok(Self::None),
            other => Err(Error::Protocol(format!("unknown SMTP security mode: {other}"))),
        }
    }
}

/// Connects, greets and (for STARTTLS) upgrades the session.
///
/// The returned client has completed EHLO over the final transport.
///
/// # Errors
///
/// Returns an error if any step of session setup fails.
pub async fn connect(
    host: &str,
    port: u16,
    security: Security,
    client_name: &str,
) -> Result<Client<SmtpStream, Connected>> {
    let tcp = connect_tcp(host, port).await?;
    match security {
        Security::Implicit => {
            let tls = wrap_tls(tcp, host).await?;
            Client::greet(tls, client_name).await
        }
        Security::StartTls => {
            let plain = Client::greet(SmtpStream::Tcp(tcp), client_name).await?;
            let SmtpStream::Tcp(tcp) = plain.starttls().await? else {
                return Err(Error::Protocol("stream already encrypted".into()));
            };
            let tls = wrap_tls(tcp, host).await?;
            Client::resume(tls, client_name).await
        }
        Security::None => Client::greet(SmtpStream::Tcp(tcp), client_name).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_security_from_str() {
        assert_eq!("SSL".parse::<Security>().unwrap(), Security::Implicit);
        assert_eq!("starttls".parse::<Security>().unwrap(), Security::StartTls);
        assert_eq!("none".parse::<Security>().unwrap(), Security::None);
        assert!("bogus".parse::<Security>().is_err());
    }
}
