//! # motionwatch-imap
//!
//! A small async IMAP client covering what a mailbox poller needs:
//! LOGIN, SELECT, UID SEARCH, UID FETCH, UID STORE, EXPUNGE and LOGOUT.
//!
//! ## Connection States
//!
//! ```text
//! NotAuthenticated ── login() ──→ Authenticated ── select() ──→ Selected
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use motionwatch_imap::{Client, SearchQuery, connection::connect_tls};
//!
//! let stream = connect_tls("imap.example.com", 993).await?;
//! let client = Client::from_stream(stream).await?;
//! let mut inbox = client.login("cam", "secret").await?.select("INBOX").await?;
//! let uids = inbox.uid_search(&SearchQuery::new().text("Motion DetectStart")).await?;
//! inbox.logout().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;

pub use command::{Command, FetchAttribute, Flag, SearchQuery, StoreAction, TagGenerator, imap_date};
pub use connection::{
    Authenticated, Client, FetchedMessage, FramedStream, ImapStream, NotAuthenticated, Selected,
};
pub use error::{Error, Result};
pub use parser::{FetchItem, Response, ResponseParser, Status, Untagged};

/// Default implicit-TLS port.
pub const DEFAULT_TLS_PORT: u16 = 993;
