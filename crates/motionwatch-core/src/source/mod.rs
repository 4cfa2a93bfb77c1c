//! Item sources.
//!
//! A [`Source`] opens sessions; a [`SourceSession`] lists, downloads and
//! acknowledges items for the duration of one cycle.

mod folder;
mod imap;

use async_trait::async_trait;

pub use folder::{FolderSession, FolderSource, PROCESSED_DIR};
pub use imap::{ImapSession, ImapSource};

use crate::Result;
use crate::model::{AckMode, ItemFilter, Payload, SourceItem};

/// Factory for source sessions.
#[async_trait]
pub trait Source: Send + Sync {
    /// Session type produced by [`Source::connect`].
    type Session: SourceSession;

    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns a connection-level error if the source cannot be reached.
    async fn connect(&self) -> Result<Self::Session>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// One live session with a source.
#[async_trait]
pub trait SourceSession: Send + Sized {
    /// Lists candidate items. The keyword and unread criteria are applied
    /// here when the source supports them.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn list(&mut self, filter: &ItemFilter) -> Result<Vec<SourceItem>>;

    /// Downloads an item's image payloads.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] if the item content is unusable,
    /// or another error if the download fails.
    async fn fetch(&mut self, item: &SourceItem) -> Result<Vec<Payload>>;

    /// Marks an item handled at the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source rejects the change.
    async fn acknowledge(&mut self, item: &SourceItem, mode: AckMode) -> Result<()>;

    /// Ends the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the goodbye exchange fails.
    async fn disconnect(self) -> Result<()>;
}
