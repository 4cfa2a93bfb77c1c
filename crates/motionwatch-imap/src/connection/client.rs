//! Type-state IMAP client.
//!
//! The connection moves through three states, each exposing only the
//! commands valid in it:
//!
//! - [`NotAuthenticated`]: after the greeting
//! - [`Authenticated`]: after LOGIN
//! - [`Selected`]: after SELECT

use tokio::io::{AsyncRead, AsyncWrite};

use super::framed::FramedStream;
use crate::command::{Command, FetchAttribute, SearchQuery, StoreAction, TagGenerator};
use crate::parser::{FetchItem, Response, ResponseParser, Status, Untagged};
use crate::{Error, Result};

/// Marker for the not-authenticated state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Marker for the authenticated state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// State of a selected mailbox.
#[derive(Debug, Clone, Default)]
pub struct Selected {
    mailbox: String,
    uid_validity: Option<u32>,
}

/// IMAP client connection, parameterised by protocol state.
pub struct Client<S, State> {
    stream: FramedStream<S>,
    tags: TagGenerator,
    state: State,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tags", &self.tags)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// One message from a UID FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Sequence number.
    pub seq: u32,
    /// Returned data items.
    pub items: Vec<FetchItem>,
}

impl FetchedMessage {
    /// Returns the UID, if it was fetched.
    #[must_use]
    pub fn uid(&self) -> Option<u32> {
        self.items.iter().find_map(|i| match i {
            FetchItem::Uid(uid) => Some(*uid),
            _ => None,
        })
    }

    /// Returns the raw INTERNALDATE string.
    #[must_use]
    pub fn internal_date(&self) -> Option<&str> {
        self.items.iter().find_map(|i| match i {
            FetchItem::InternalDate(d) => Some(d.as_str()),
            _ => None,
        })
    }

    /// Returns RFC822.SIZE.
    #[must_use]
    pub fn size(&self) -> Option<u32> {
        self.items.iter().find_map(|i| match i {
            FetchItem::Rfc822Size(n) => Some(*n),
            _ => None,
        })
    }

    /// Returns the first BODY section whose specifier starts with `prefix`.
    ///
    /// Pass `""` for the full message (`BODY[]`).
    #[must_use]
    pub fn body(&self, prefix: &str) -> Option<&[u8]> {
        self.items.iter().find_map(|i| match i {
            FetchItem::Body {
                section,
                data: Some(data),
            } if section.to_ascii_uppercase().starts_with(prefix) => Some(data.as_slice()),
            _ => None,
        })
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn transition<Next>(self, state: Next) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            state,
        }
    }

    /// Sends a command and collects responses up to its tagged completion.
    async fn execute(&mut self, command: &Command) -> Result<Vec<Response>> {
        let tag = self.tags.next_tag();
        self.stream.write_command(&command.serialize(&tag)).await?;
        let responses = self.stream.read_until_tagged(&tag).await?;
        check_tagged_ok(&responses)?;
        Ok(responses)
    }

    /// Logs out and closes the session.
    ///
    /// The untagged `BYE` the server sends before completing LOGOUT is
    /// expected and not treated as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn logout(mut self) -> Result<()> {
        match self.execute(&Command::Logout).await {
            Ok(_) | Err(Error::Bye(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting from a freshly connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server refuses the connection.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);
        let greeting = ResponseParser::parse(&framed.read_response().await?)?;

        match greeting {
            Response::Untagged(Untagged::Condition {
                status: Status::Ok | Status::PreAuth,
                ..
            }) => {}
            Response::Untagged(Untagged::Condition {
                status: Status::Bye,
                text,
                ..
            }) => return Err(Error::Bye(text)),
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }

        Ok(Self {
            stream: framed,
            tags: TagGenerator::default(),
            state: NotAuthenticated,
        })
    }

    /// Authenticates with LOGIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the credentials are rejected.
    pub async fn login(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        self.execute(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
        tracing::debug!(username, "IMAP login succeeded");
        Ok(self.transition(Authenticated))
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Selects a mailbox read-write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::No`] if the mailbox does not exist.
    pub async fn select(mut self, mailbox: &str) -> Result<Client<S, Selected>> {
        let responses = self
            .execute(&Command::Select {
                mailbox: mailbox.to_string(),
            })
            .await?;

        let uid_validity = responses.iter().find_map(|r| match r {
            Response::Untagged(u) => u.uid_validity(),
            _ => None,
        });

        Ok(self.transition(Selected {
            mailbox: mailbox.to_string(),
            uid_validity,
        }))
    }
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the selected mailbox name.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.state.mailbox
    }

    /// Returns UIDVALIDITY reported on SELECT.
    #[must_use]
    pub const fn uid_validity(&self) -> Option<u32> {
        self.state.uid_validity
    }

    /// Runs UID SEARCH and returns matching UIDs in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn uid_search(&mut self, query: &SearchQuery) -> Result<Vec<u32>> {
        let responses = self.execute(&Command::UidSearch(query.clone())).await?;
        let mut uids: Vec<u32> = responses
            .into_iter()
            .filter_map(|r| match r {
                Response::Untagged(Untagged::Search(ids)) => Some(ids),
                _ => None,
            })
            .flatten()
            .collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// Runs UID FETCH.
    ///
    /// An empty UID list returns immediately without touching the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    pub async fn uid_fetch(
        &mut self,
        uids: &[u32],
        items: Vec<FetchAttribute>,
    ) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let responses = self
            .execute(&Command::UidFetch {
                uids: uids.to_vec(),
                items,
            })
            .await?;
        Ok(responses
            .into_iter()
            .filter_map(|r| match r {
                Response::Untagged(Untagged::Fetch { seq, items }) => {
                    Some(FetchedMessage { seq, items })
                }
                _ => None,
            })
            .collect())
    }

    /// Runs UID STORE with `.SILENT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn uid_store(&mut self, uids: &[u32], action: StoreAction) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        self.execute(&Command::UidStore {
            uids: uids.to_vec(),
            action,
        })
        .await
        .map(drop)
    }

    /// Permanently removes messages flagged `\Deleted`.
    ///
    /// # Errors
    ///
    /// Returns an error if the expunge fails.
    pub async fn expunge(&mut self) -> Result<()> {
        self.execute(&Command::Expunge).await.map(drop)
    }
}

/// Maps the final tagged response to a result.
fn check_tagged_ok(responses: &[Response]) -> Result<()> {
    match responses.last() {
        Some(Response::Tagged { status, text, .. }) => match status {
            Status::Ok | Status::PreAuth => Ok(()),
            Status::No => Err(Error::No(text.clone())),
            Status::Bad => Err(Error::Bad(text.clone())),
            Status::Bye => Err(Error::Bye(text.clone())),
        },
        _ => Err(Error::Protocol("missing tagged response".into())),
    }
}
