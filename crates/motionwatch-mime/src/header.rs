//! Header block parsing.

use std::fmt;

use crate::encoding::decode_rfc2047;

/// Ordered header fields. Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, keeping existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Returns the first value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value of `name` with encoded-words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Iterates over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses a header block and returns it with the offset of the body.
    ///
    /// Folded lines are unfolded. Lines without a colon are skipped. Input
    /// without a blank separator line is all headers and an empty body.
    #[must_use]
    pub fn parse(raw: &[u8]) -> (Self, usize) {
        let mut headers = Self::new();
        let mut pos = 0;
        let mut body_start = raw.len();

        while pos < raw.len() {
            let end = raw[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(raw.len(), |i| pos + i + 1);
            let line = &raw[pos..end];
            let trimmed = trim_eol(line);
            pos = end;

            if trimmed.is_empty() {
                body_start = end;
                break;
            }

            let text = String::from_utf8_lossy(trimmed);
            if trimmed[0] == b' ' || trimmed[0] == b'\t' {
                if let Some((_, value)) = headers.fields.last_mut() {
                    value.push(' ');
                    value.push_str(text.trim());
                }
            } else if let Some((name, value)) = text.split_once(':') {
                headers.add(name.trim(), value.trim());
            }
        }

        (headers, body_start)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_folding() {
        let raw = b"Subject: Motion\r\n DetectStart\r\nMessage-ID: <1@cam>\r\n\r\nbody";
        let (headers, offset) = Headers::parse(raw);
        assert_eq!(headers.get("subject"), Some("Motion DetectStart"));
        assert_eq!(headers.get("MESSAGE-ID"), Some("<1@cam>"));
        assert_eq!(&raw[offset..], b"body");
    }

    #[test]
    fn test_parse_bare_lf() {
        let raw = b"Content-Type: text/plain\n\nhello\n";
        let (headers, offset) = Headers::parse(raw);
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(&raw[offset..], b"hello\n");
    }

    #[test]
    fn test_headers_only() {
        let (headers, offset) = Headers::parse(b"Subject: x\r\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(offset, 12);
    }

    #[test]
    fn test_display_preserves_order() {
        let mut headers = Headers::new();
        headers.add("From", "a@example.com");
        headers.add("To", "b@example.com");
        assert_eq!(headers.to_string(), "From: a@example.com\r\nTo: b@example.com\r\n");
    }
}
