//! Sans-I/O response parser.
//!
//! Parses one complete response as returned by
//! [`FramedStream::read_response`](crate::connection::FramedStream::read_response),
//! i.e. a CRLF-terminated line with any literals already inlined.

use crate::{Error, Result};

/// Status of a tagged or untagged condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// OK.
    Ok,
    /// NO.
    No,
    /// BAD.
    Bad,
    /// PREAUTH (greeting only).
    PreAuth,
    /// BYE.
    Bye,
}

impl Status {
    fn parse(atom: &str) -> Option<Self> {
        match atom.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// A data item from a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// UID.
    Uid(u32),
    /// INTERNALDATE, unparsed (`"17-Jul-1996 02:44:25 -0700"`).
    InternalDate(String),
    /// RFC822.SIZE.
    Rfc822Size(u32),
    /// FLAGS.
    Flags(Vec<String>),
    /// BODY[section] contents.
    Body {
        /// Section specifier as sent by the server.
        section: String,
        /// Section data, `None` for NIL.
        data: Option<Vec<u8>>,
    },
}

/// Untagged server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// `* OK|NO|BAD|BYE|PREAUTH [code] text`.
    Condition {
        /// Condition status.
        status: Status,
        /// Bracketed response code, without brackets.
        code: Option<String>,
        /// Human readable text.
        text: String,
    },
    /// `* SEARCH 1 2 3`.
    Search(Vec<u32>),
    /// `* n FETCH (...)`.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Data items.
        items: Vec<FetchItem>,
    },
    /// `* n EXISTS`.
    Exists(u32),
    /// Anything the poller does not care about.
    Other(String),
}

impl Untagged {
    /// Extracts UIDVALIDITY from a `* OK [UIDVALIDITY n]` response.
    #[must_use]
    pub fn uid_validity(&self) -> Option<u32> {
        match self {
            Self::Condition {
                code: Some(code), ..
            } => code
                .strip_prefix("UIDVALIDITY ")
                .and_then(|n| n.trim().parse().ok()),
            _ => None,
        }
    }
}

/// A parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Completion of a tagged command.
    Tagged {
        /// Command tag.
        tag: String,
        /// Completion status.
        status: Status,
        /// Human readable text.
        text: String,
    },
    /// Untagged data.
    Untagged(Untagged),
    /// `+ text` continuation request.
    Continuation(String),
}

/// Response parser entry point.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses a complete response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the response is malformed.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut cur = Cursor::new(input);

        if cur.eat(b'+') {
            cur.skip_spaces();
            return Ok(Response::Continuation(cur.rest_of_line()));
        }

        if cur.eat(b'*') {
            cur.expect(b' ')?;
            return Ok(Response::Untagged(Self::parse_untagged(&mut cur)?));
        }

        let tag = cur.atom()?;
        cur.expect(b' ')?;
        let status_atom = cur.atom()?;
        let status = Status::parse(&status_atom)
            .ok_or_else(|| cur.error(format!("unknown status {status_atom}")))?;
        cur.skip_spaces();
        Ok(Response::Tagged {
            tag,
            status,
            text: cur.rest_of_line(),
        })
    }

    fn parse_untagged(cur: &mut Cursor<'_>) -> Result<Untagged> {
        if cur.peek().is_some_and(|b| b.is_ascii_digit()) {
            let n = cur.number()?;
            cur.expect(b' ')?;
            let kind = cur.atom()?.to_ascii_uppercase();
            return match kind.as_str() {
                "EXISTS" => Ok(Untagged::Exists(n)),
                "FETCH" => {
                    cur.expect(b' ')?;
                    let items = Self::parse_fetch_items(cur)?;
                    Ok(Untagged::Fetch { seq: n, items })
                }
                _ => Ok(Untagged::Other(format!("{n} {kind}"))),
            };
        }

        let kind = cur.atom()?;
        if let Some(status) = Status::parse(&kind) {
            cur.skip_spaces();
            let code = if cur.eat(b'[') {
                Some(cur.take_until(b']')?)
            } else {
                None
            };
            cur.skip_spaces();
            return Ok(Untagged::Condition {
                status,
                code,
                text: cur.rest_of_line(),
            });
        }

        if kind.eq_ignore_ascii_case("SEARCH") {
            let mut ids = Vec::new();
            loop {
                cur.skip_spaces();
                if !cur.peek().is_some_and(|b| b.is_ascii_digit()) {
                    break;
                }
                ids.push(cur.number()?);
            }
            return Ok(Untagged::Search(ids));
        }

        Ok(Untagged::Other(format!("{kind} {}", cur.rest_of_line())))
    }

    fn parse_fetch_items(cur: &mut Cursor<'_>) -> Result<Vec<FetchItem>> {
        cur.expect(b'(')?;
        let mut items = Vec::new();

        loop {
            cur.skip_spaces();
            if cur.eat(b')') {
                break;
            }

            let name = cur.attribute_name()?.to_ascii_uppercase();
            match name.as_str() {
                "UID" => {
                    cur.expect(b' ')?;
                    items.push(FetchItem::Uid(cur.number()?));
                }
                "RFC822.SIZE" => {
                    cur.expect(b' ')?;
                    items.push(FetchItem::Rfc822Size(cur.number()?));
                }
                "INTERNALDATE" => {
                    cur.expect(b' ')?;
                    let date = cur.quoted()?;
                    items.push(FetchItem::InternalDate(date));
                }
                "FLAGS" => {
                    cur.expect(b' ')?;
                    items.push(FetchItem::Flags(cur.flag_list()?));
                }
                "BODY" | "BODY.PEEK" | "RFC822" if cur.peek() == Some(b'[') || name == "RFC822" => {
                    let section = if cur.eat(b'[') {
                        cur.take_until(b']')?
                    } else {
                        String::new()
                    };
                    // Partial origin, e.g. BODY[]<0>
                    if cur.eat(b'<') {
                        cur.take_until(b'>')?;
                    }
                    cur.expect(b' ')?;
                    let data = cur.nstring()?;
                    items.push(FetchItem::Body { section, data });
                }
                _ => {
                    cur.expect(b' ')?;
                    cur.skip_value()?;
                }
            }
        }

        Ok(items)
    }
}

/// Byte cursor over a single response.
struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", b as char)))
        }
    }

    fn skip_spaces(&mut self) {
        while self.eat(b' ') {}
    }

    fn rest_of_line(&mut self) -> String {
        let rest = &self.input[self.pos..];
        self.pos = self.input.len();
        String::from_utf8_lossy(rest).trim_end().to_string()
    }

    /// Reads an atom: everything up to a delimiter.
    fn atom(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'(' | b')' | b'[' | b']' | b'\r' | b'\n' | b'{' | b'"') {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected atom"));
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    /// Reads a FETCH attribute name (atoms may include dots, e.g. `RFC822.SIZE`).
    fn attribute_name(&mut self) -> Result<String> {
        self.atom()
    }

    fn number(&mut self) -> Result<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("expected number"))
    }

    /// Takes text up to (not including) `end` and consumes `end`.
    fn take_until(&mut self, end: u8) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == end {
                let text = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(text);
            }
            self.pos += 1;
        }
        Err(self.error(format!("unterminated, expected '{}'", end as char)))
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted string")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    if let Some(b) = self.peek() {
                        out.push(b);
                        self.pos += 1;
                    }
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Reads `{n}\r\n` followed by `n` bytes.
    fn literal(&mut self) -> Result<Vec<u8>> {
        self.expect(b'{')?;
        let len = self.number()? as usize;
        self.eat(b'+');
        self.expect(b'}')?;
        self.expect(b'\r')?;
        self.expect(b'\n')?;
        let end = self.pos + len;
        if end > self.input.len() {
            return Err(self.error("literal exceeds response"));
        }
        let data = self.input[self.pos..end].to_vec();
        self.pos = end;
        Ok(data)
    }

    /// Reads NIL, a quoted string or a literal.
    fn nstring(&mut self) -> Result<Option<Vec<u8>>> {
        match self.peek() {
            Some(b'"') => Ok(Some(self.quoted()?.into_bytes())),
            Some(b'{') => Ok(Some(self.literal()?)),
            _ => {
                let atom = self.atom()?;
                if atom.eq_ignore_ascii_case("NIL") {
                    Ok(None)
                } else {
                    Err(self.error(format!("expected nstring, got {atom}")))
                }
            }
        }
    }

    fn flag_list(&mut self) -> Result<Vec<String>> {
        self.expect(b'(')?;
        let mut flags = Vec::new();
        loop {
            self.skip_spaces();
            if self.eat(b')') {
                return Ok(flags);
            }
            flags.push(self.atom()?);
        }
    }

    /// Skips one value of any shape (atom, string, literal, list).
    fn skip_value(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'"') => self.quoted().map(drop),
            Some(b'{') => self.literal().map(drop),
            Some(b'(') => {
                self.pos += 1;
                loop {
                    self.skip_spaces();
                    if self.eat(b')') {
                        return Ok(());
                    }
                    self.skip_value()?;
                }
            }
            _ => {
                self.atom()?;
                if self.eat(b'[') {
                    self.take_until(b']')?;
                }
                Ok(())
            }
        }
    }
}
