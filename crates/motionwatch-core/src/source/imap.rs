//! IMAP mailbox source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use motionwatch_imap::connection::connect_tls;
use motionwatch_imap::{
    Client, FetchAttribute, FetchedMessage, Flag, ImapStream, SearchQuery, Selected, StoreAction,
};
use motionwatch_mime::{Headers, Message};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Source, SourceSession};
use crate::config::ImapSettings;
use crate::model::{AckMode, ItemFilter, ItemId, Payload, PayloadRef, SourceItem};
use crate::{Error, Result};

const HEADER_SECTION: &str = "HEADER.FIELDS (SUBJECT MESSAGE-ID)";

/// Polls one IMAP mailbox over implicit TLS.
#[derive(Debug, Clone)]
pub struct ImapSource {
    settings: ImapSettings,
}

impl ImapSource {
    /// Creates a source for the given mailbox.
    #[must_use]
    pub const fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Source for ImapSource {
    type Session = ImapSession<ImapStream>;

    async fn connect(&self) -> Result<Self::Session> {
        let stream = connect_tls(&self.settings.host, self.settings.port).await?;
        ImapSession::open(stream, &self.settings).await
    }

    fn describe(&self) -> String {
        format!(
            "imap://{}@{}:{}/{}",
            self.settings.username, self.settings.host, self.settings.port, self.settings.mailbox
        )
    }
}

/// A logged-in session with the mailbox selected.
#[derive(Debug)]
pub struct ImapSession<S> {
    client: Client<S, Selected>,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Greets, logs in and selects the configured mailbox on `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if any step is refused or the connection fails.
    pub async fn open(stream: S, settings: &ImapSettings) -> Result<Self> {
        let client = Client::from_stream(stream)
            .await?
            .login(&settings.username, settings.password.expose())
            .await?
            .select(&settings.mailbox)
            .await?;
        tracing::debug!(
            mailbox = client.mailbox(),
            uid_validity = client.uid_validity(),
            "Mailbox selected"
        );
        Ok(Self { client })
    }

    fn to_item(&self, message: &FetchedMessage) -> Option<SourceItem> {
        let uid = message.uid()?;
        let (headers, _) = Headers::parse(message.body("HEADER").unwrap_or_default());

        let received_at = message
            .internal_date()
            .and_then(parse_internal_date)
            .unwrap_or_else(|| {
                tracing::warn!(uid, "Unparseable INTERNALDATE, using current time");
                Utc::now()
            });

        let id = headers
            .get("message-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(
                || {
                    ItemId::new(format!(
                        "{}/{}/{uid}",
                        self.client.mailbox(),
                        self.client.uid_validity().unwrap_or(0)
                    ))
                },
                ItemId::new,
            );

        Some(SourceItem {
            id,
            locator: uid.to_string(),
            received_at,
            payload_refs: vec![PayloadRef {
                filename: format!("{uid}.eml"),
                size: u64::from(message.size().unwrap_or(0)),
            }],
            subject: headers.get_decoded("subject").unwrap_or_default(),
        })
    }
}

#[async_trait]
impl<S> SourceSession for ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn list(&mut self, filter: &ItemFilter) -> Result<Vec<SourceItem>> {
        let mut query = SearchQuery::new()
            .since(filter.since(Utc::now()).date_naive())
            .unseen(filter.unseen_only);
        if let Some(keyword) = &filter.keyword {
            query = query.text(keyword.clone());
        }

        let uids = self.client.uid_search(&query).await?;
        let messages = self
            .client
            .uid_fetch(
                &uids,
                vec![
                    FetchAttribute::Uid,
                    FetchAttribute::InternalDate,
                    FetchAttribute::Rfc822Size,
                    FetchAttribute::BodyPeek(Some(HEADER_SECTION.to_string())),
                ],
            )
            .await?;

        Ok(messages.iter().filter_map(|m| self.to_item(m)).collect())
    }

    async fn fetch(&mut self, item: &SourceItem) -> Result<Vec<Payload>> {
        let uid = parse_uid(item)?;
        let messages = self
            .client
            .uid_fetch(&[uid], vec![FetchAttribute::Uid, FetchAttribute::BodyPeek(None)])
            .await?;
        let raw = messages
            .iter()
            .find(|m| m.uid() == Some(uid))
            .and_then(|m| m.body(""))
            .ok_or_else(|| Error::Decode(format!("message {uid} has no body")))?;

        let expected = item.payload_refs.first().map_or(0, |r| r.size);
        if (raw.len() as u64) < expected {
            return Err(Error::Decode(format!(
                "message {uid} truncated: {} of {expected} bytes",
                raw.len()
            )));
        }

        let message = Message::parse(raw)?;
        Ok(message
            .image_attachments()
            .into_iter()
            .map(|a| Payload {
                filename: a.filename,
                content_type: Some(a.content_type),
                expected_size: None,
                data: a.data,
            })
            .collect())
    }

    async fn acknowledge(&mut self, item: &SourceItem, mode: AckMode) -> Result<()> {
        let uid = parse_uid(item)?;
        match mode {
            AckMode::Delete => {
                self.client
                    .uid_store(&[uid], StoreAction::Add(vec![Flag::Deleted]))
                    .await?;
                self.client.expunge().await?;
            }
            AckMode::MarkSeen => {
                self.client
                    .uid_store(&[uid], StoreAction::Add(vec![Flag::Seen]))
                    .await?;
            }
        }
        Ok(())
    }

    async fn disconnect(self) -> Result<()> {
        self.client.logout().await?;
        Ok(())
    }
}

fn parse_uid(item: &SourceItem) -> Result<u32> {
    item.locator
        .parse()
        .map_err(|_| Error::Source(format!("invalid UID locator {:?}", item.locator)))
}

/// Parses an INTERNALDATE such as ` 6-Oct-2026 09:15:02 +0200`.
fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
