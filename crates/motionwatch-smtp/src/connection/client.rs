//! Type-state SMTP client.
//!
//! ```text
//! Connected ── auth_plain() ──→ Authenticated ── mail_from() ──→ MailTransaction
//!     ── rcpt_to() ──→ RecipientAdded ── data() ──→ Data ── send_message() ──→ Authenticated
//! ```

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::command::{Command, encode_data};
use crate::error::{Error, Result};
use crate::parser::{is_last_line, parse_reply};
use crate::types::{Address, Reply, ReplyCode};

/// Greeted, EHLO sent.
#[derive(Debug)]
pub struct Connected;

/// AUTH succeeded.
#[derive(Debug)]
pub struct Authenticated;

/// MAIL FROM accepted.
#[derive(Debug)]
pub struct MailTransaction;

/// At least one RCPT TO accepted.
#[derive(Debug)]
pub struct RecipientAdded;

/// DATA accepted, ready for the message body.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<S, State> {
    stream: BufReader<S>,
    ehlo: Option<Reply>,
    _state: std::marker::PhantomData<State>,
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn into_state<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            ehlo: self.ehlo,
            _state: std::marker::PhantomData,
        }
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        let stream = self.stream.get_mut();
        stream.write_all(&cmd.serialize()).await?;
        stream.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            let last = is_last_line(&line);
            lines.push(line);
            if last {
                return parse_reply(&lines);
            }
        }
    }

    /// Sends QUIT. A `221` or any 2xx reply counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the server rejects QUIT.
    pub async fn quit(mut self) -> Result<()> {
        self.send_command(&Command::Quit).await?.expect_success()?;
        Ok(())
    }
}

impl<S> Client<S, Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the 220 greeting and sends EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses the session.
    pub async fn greet(stream: S, client_name: &str) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            ehlo: None,
            _state: std::marker::PhantomData,
        };
        client.read_reply().await?.expect_code(ReplyCode::SERVICE_READY)?;
        client.ehlo(client_name).await?;
        Ok(client)
    }

    /// Sends EHLO on a stream that already received its greeting, as after
    /// STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if EHLO is rejected.
    pub async fn resume(stream: S, client_name: &str) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            ehlo: None,
            _state: std::marker::PhantomData,
        };
        client.ehlo(client_name).await?;
        Ok(client)
    }

    async fn ehlo(&mut self, client_name: &str) -> Result<()> {
        let reply = self
            .send_command(&Command::Ehlo(client_name.to_string()))
            .await?
            .expect_success()?;
        self.ehlo = Some(reply);
        Ok(())
    }

    /// Returns true if the last EHLO advertised `keyword`.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.ehlo.as_ref().is_some_and(|r| r.advertises(keyword))
    }

    /// Issues STARTTLS and hands back the raw stream for the TLS handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if STARTTLS was not advertised.
    pub async fn starttls(mut self) -> Result<S> {
        if !self.supports("STARTTLS") {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        self.send_command(&Command::StartTls)
            .await?
            .expect_code(ReplyCode::SERVICE_READY)?;
        Ok(self.stream.into_inner())
    }

    /// Authenticates with AUTH PLAIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Reply`] if the credentials are rejected.
    pub async fn auth_plain(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        self.send_command(&Command::AuthPlain {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?
        .expect_code(ReplyCode::AUTH_OK)?;
        tracing::debug!(username, "SMTP authentication succeeded");
        Ok(self.into_state())
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if MAIL FROM is rejected.
    pub async fn mail_from(mut self, from: Address) -> Result<Client<S, MailTransaction>> {
        self.send_command(&Command::MailFrom(from)).await?.expect_success()?;
        Ok(self.into_state())
    }

    /// Runs a complete transaction for one message.
    ///
    /// # Errors
    ///
    /// Returns the first rejected step.
    pub async fn send_mail(self, from: Address, to: &[Address], message: &[u8]) -> Result<Self> {
        let (first, rest) = to
            .split_first()
            .ok_or_else(|| Error::InvalidAddress("no recipients".into()))?;
        let mut client = self.mail_from(from).await?.rcpt_to(first.clone()).await?;
        for rcpt in rest {
            client = client.rcpt_to(rcpt.clone()).await?;
        }
        client.data().await?.send_message(message).await
    }
}

impl<S> Client<S, MailTransaction>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if RCPT TO is rejected.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<S, RecipientAdded>> {
        self.send_command(&Command::RcptTo(to)).await?.expect_success()?;
        Ok(self.into_state())
    }
}

impl<S> Client<S, RecipientAdded>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds another recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if RCPT TO is rejected.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.send_command(&Command::RcptTo(to)).await?.expect_success()?;
        Ok(self)
    }

    /// Sends DATA.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 354.
    pub async fn data(mut self) -> Result<Client<S, Data>> {
        self.send_command(&Command::Data)
            .await?
            .expect_code(ReplyCode::START_DATA)?;
        Ok(self.into_state())
    }
}

impl<S> Client<S, Data>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Streams the message, terminated by `.`, and waits for acceptance.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the message.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<S, Authenticated>> {
        let stream = self.stream.get_mut();
        stream.write_all(&encode_data(message)).await?;
        stream.flush().await?;
        let reply = self.read_reply().await?.expect_success()?;
        tracing::debug!(reply = %reply.text(), "Message accepted");
        Ok(self.into_state())
    }
}
