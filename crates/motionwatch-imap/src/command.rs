//! IMAP command builders.
//!
//! Only the commands needed to poll a mailbox are modelled: LOGIN, SELECT,
//! UID SEARCH, UID FETCH, UID STORE, EXPUNGE and LOGOUT.

use chrono::NaiveDate;

/// Tag generator for IMAP commands.
///
/// Generates sequential tags in the format "A0001", "A0002", etc.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("{}{:04}", self.prefix, self.counter)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}

/// System flags the poller sets on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// `\Seen`
    Seen,
    /// `\Deleted`
    Deleted,
}

impl Flag {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Deleted => "\\Deleted",
        }
    }
}

/// UID SEARCH criteria.
///
/// Criteria are ANDed together, as in the protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    since: Option<NaiveDate>,
    unseen: bool,
    text: Option<String>,
}

impl SearchQuery {
    /// Creates a query matching every message (`ALL`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to messages whose internal date is on or after `date`.
    #[must_use]
    pub const fn since(mut self, date: NaiveDate) -> Self {
        self.since = Some(date);
        self
    }

    /// Restricts to messages without the `\Seen` flag.
    #[must_use]
    pub const fn unseen(mut self, unseen: bool) -> Self {
        self.unseen = unseen;
        self
    }

    /// Restricts to messages containing `text` in headers or body.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn write(&self, buf: &mut Vec<u8>) {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        if let Some(date) = self.since {
            parts.push(format!("SINCE {}", imap_date(date)).into_bytes());
        }
        if self.unseen {
            parts.push(b"UNSEEN".to_vec());
        }
        if let Some(text) = &self.text {
            let mut part = b"TEXT ".to_vec();
            write_quoted(&mut part, text);
            parts.push(part);
        }
        if parts.is_empty() {
            buf.extend_from_slice(b"ALL");
            return;
        }
        buf.extend_from_slice(&parts.join(&b' '));
    }
}

/// Formats a date the way SEARCH expects it (`16-Oct-2026`).
#[must_use]
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Individual FETCH attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// UID.
    Uid,
    /// Internal date.
    InternalDate,
    /// RFC822 size.
    Rfc822Size,
    /// Message flags.
    Flags,
    /// Body section, always fetched with `.PEEK` so `\Seen` is untouched.
    BodyPeek(Option<String>),
}

impl FetchAttribute {
    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Uid => buf.extend_from_slice(b"UID"),
            Self::InternalDate => buf.extend_from_slice(b"INTERNALDATE"),
            Self::Rfc822Size => buf.extend_from_slice(b"RFC822.SIZE"),
            Self::Flags => buf.extend_from_slice(b"FLAGS"),
            Self::BodyPeek(section) => {
                buf.extend_from_slice(b"BODY.PEEK[");
                if let Some(s) = section {
                    buf.extend_from_slice(s.as_bytes());
                }
                buf.push(b']');
            }
        }
    }
}

/// STORE modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// `+FLAGS.SILENT (...)`
    Add(Vec<Flag>),
    /// `-FLAGS.SILENT (...)`
    Remove(Vec<Flag>),
}

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// LOGIN with plaintext credentials.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// SELECT a mailbox read-write.
    Select {
        /// Mailbox name.
        mailbox: String,
    },
    /// UID SEARCH.
    UidSearch(SearchQuery),
    /// UID FETCH.
    UidFetch {
        /// UIDs to fetch.
        uids: Vec<u32>,
        /// Attributes to fetch.
        items: Vec<FetchAttribute>,
    },
    /// UID STORE (always silent).
    UidStore {
        /// UIDs to modify.
        uids: Vec<u32>,
        /// Flag change.
        action: StoreAction,
    },
    /// EXPUNGE.
    Expunge,
    /// LOGOUT.
    Logout,
}

impl Command {
    /// Serializes the command with the given tag, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');

        match self {
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox);
            }
            Self::UidSearch(query) => {
                buf.extend_from_slice(b"UID SEARCH ");
                query.write(&mut buf);
            }
            Self::UidFetch { uids, items } => {
                buf.extend_from_slice(b"UID FETCH ");
                write_uid_set(&mut buf, uids);
                buf.extend_from_slice(b" (");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    item.write(&mut buf);
                }
                buf.push(b')');
            }
            Self::UidStore { uids, action } => {
                buf.extend_from_slice(b"UID STORE ");
                write_uid_set(&mut buf, uids);
                let (prefix, flags) = match action {
                    StoreAction::Add(f) => (" +FLAGS.SILENT (", f),
                    StoreAction::Remove(f) => (" -FLAGS.SILENT (", f),
                };
                buf.extend_from_slice(prefix.as_bytes());
                let names: Vec<&str> = flags.iter().map(|f| f.as_str()).collect();
                buf.extend_from_slice(names.join(" ").as_bytes());
                buf.push(b')');
            }
            Self::Expunge => buf.extend_from_slice(b"EXPUNGE"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Writes a comma separated UID list.
fn write_uid_set(buf: &mut Vec<u8>, uids: &[u32]) {
    let joined = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    buf.extend_from_slice(joined.as_bytes());
}

/// Writes an astring (atom or quoted string).
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        write_quoted(buf, s);
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Writes a quoted string, escaping `"` and `\`.
fn write_quoted(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

/// Returns true if the byte cannot appear in an atom.
const fn needs_quoting(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*' | b']'
    ) || b < 0x20
        || b == 0x7F
}
