//! Reply line parsing.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Returns true if `line` ends a reply (`250 ` rather than `250-`).
#[must_use]
pub fn is_last_line(line: &str) -> bool {
    line.len() == 3 || line.as_bytes().get(3) == Some(&b' ')
}

/// Assembles a reply from its lines (CRLF already stripped).
///
/// # Errors
///
/// Returns [`Error::Protocol`] for an empty reply, a bad code, or lines whose
/// codes disagree.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let first = lines
        .first()
        .ok_or_else(|| Error::Protocol("empty reply".into()))?;
    let code = parse_code(first)?;

    let mut text = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!("mixed reply codes: {line}")));
        }
        text.push(line.get(4..).unwrap_or_default().to_string());
    }

    Ok(Reply {
        code: ReplyCode::new(code),
        lines: text,
    })
}

fn parse_code(line: &str) -> Result<u16> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed reply line: {line}")))
}
