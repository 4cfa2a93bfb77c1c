//! Message structure and attachment extraction.

use std::fmt;

use crate::content_type::{ContentType, disposition_filename};
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;

/// Deepest multipart nesting accepted.
const MAX_DEPTH: usize = 16;

/// Content-Transfer-Encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit.
    EightBit,
    /// Base64.
    Base64,
    /// Quoted-Printable.
    QuotedPrintable,
    /// Binary.
    Binary,
}

impl TransferEncoding {
    /// Parses a header value, defaulting to 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// A MIME entity: either a leaf with a body or a multipart container.
#[derive(Debug, Clone)]
pub struct Part {
    /// Entity headers.
    pub headers: Headers,
    /// Raw (still transfer-encoded) body. Empty for containers.
    pub body: Vec<u8>,
    /// Child entities of a multipart container.
    pub children: Vec<Part>,
}

impl Part {
    fn parse(raw: &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::TooDeep(MAX_DEPTH));
        }
        let (headers, offset) = Headers::parse(raw);
        let body = &raw[offset..];
        let mut part = Self {
            headers,
            body: Vec::new(),
            children: Vec::new(),
        };

        let ct = part.content_type();
        if ct.is_multipart() {
            let boundary = ct.boundary().ok_or(Error::MissingBoundary)?;
            for section in split_multipart(body, boundary)? {
                part.children.push(Self::parse(section, depth + 1)?);
            }
        } else {
            part.body = body.to_vec();
        }
        Ok(part)
    }

    /// Content type, `text/plain` if absent or unparsable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Transfer encoding, 7bit if absent.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to its transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded body is malformed.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body),
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => Ok(self.body.clone()),
        }
    }

    /// Filename from Content-Disposition, falling back to the `name`
    /// Content-Type parameter.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.headers
            .get("content-disposition")
            .and_then(disposition_filename)
            .or_else(|| self.content_type().name())
    }

    /// Depth-first iterator over leaf entities.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        if self.children.is_empty() {
            return vec![self];
        }
        self.children.iter().flat_map(Self::leaves).collect()
    }
}

/// An image extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name, synthesized when the message has none.
    pub filename: String,
    /// Declared content type.
    pub content_type: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

/// A parsed message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Root entity; its headers are the message headers.
    pub root: Part,
}

impl Message {
    /// Parses a complete RFC 5322 message.
    ///
    /// # Errors
    ///
    /// Returns an error if the multipart structure is broken.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Ok(Self {
            root: Part::parse(raw, 0)?,
        })
    }

    /// Message headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Decoded Subject.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.root.headers.get_decoded("subject")
    }

    /// Message-ID, including angle brackets.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.root.headers.get("message-id")
    }

    /// First `text/plain` leaf, decoded lossily.
    #[must_use]
    pub fn text_body(&self) -> Option<String> {
        self.root
            .leaves()
            .into_iter()
            .find(|p| p.content_type().essence() == "text/plain")
            .and_then(|p| p.decode_body().ok())
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Extracts every image leaf, in message order.
    ///
    /// A leaf counts as an image if its type is `image/*`, or if it is
    /// `application/octet-stream` named like a JPEG or PNG file. Leaves whose
    /// body fails to decode are returned with empty data so callers can
    /// treat them as broken rather than missing.
    #[must_use]
    pub fn image_attachments(&self) -> Vec<Attachment> {
        self.root
            .leaves()
            .into_iter()
            .enumerate()
            .filter_map(|(index, part)| {
                let ct = part.content_type();
                let filename = part.filename();
                let named_image = filename.as_deref().is_some_and(has_image_extension);
                let is_image = ct.is_image()
                    || (ct.essence() == "application/octet-stream" && named_image);
                if !is_image {
                    return None;
                }
                let filename =
                    filename.unwrap_or_else(|| format!("attachment-{index}.{}", ct.sub_type));
                Some(Attachment {
                    filename,
                    content_type: ct.essence(),
                    data: part.decode_body().unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Returns true for `.jpg`, `.jpeg` and `.png` names.
#[must_use]
pub fn has_image_extension(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
}

/// Splits a multipart body into its sections.
///
/// A missing close delimiter is tolerated (truncated mail); a body with no
/// delimiter at all is an error.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut sections = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = &body[pos..end];

        if let Some(rest) = line.strip_prefix(delimiter) {
            let closing = rest.starts_with(b"--");
            if closing || rest.iter().all(u8::is_ascii_whitespace) {
                if let Some(s) = start {
                    sections.push(strip_eol(&body[s..pos]));
                }
                if closing {
                    return Ok(sections);
                }
                start = Some(end);
            }
        }
        pos = end;
    }

    match start {
        Some(s) => {
            sections.push(&body[s..]);
            Ok(sections)
        }
        None => Err(Error::InvalidMultipart(format!(
            "boundary {boundary:?} not found"
        ))),
    }
}

/// Removes the line break that belongs to the following delimiter.
fn strip_eol(section: &[u8]) -> &[u8] {
    let section = section.strip_suffix(b"\n").unwrap_or(section);
    section.strip_suffix(b"\r").unwrap_or(section)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CAMERA_MAIL: &[u8] = b"From: cam@example.com\r\n\
Subject: =?UTF-8?Q?Alarm_Cam=C3=A9ra?=\r\n\
Message-ID: <abc@cam>\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
Motion DetectStart on ch=3D1\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: image/jpeg; name=\"snap.jpg\"\r\n\
Content-Transfer-Encoding: base64\r\n\
Content-Disposition: attachment; filename=\"snap.jpg\"\r\n\
\r\n\
/9j/4AAQ\r\n\
SkZJRg==\r\n\
--outer\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"second.PNG\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0K\r\n\
--outer--\r\n";

    #[test]
    fn test_parse_nested_camera_mail() {
        let msg = Message::parse(CAMERA_MAIL).unwrap();
        assert_eq!(msg.subject().as_deref(), Some("Alarm Caméra"));
        assert_eq!(msg.message_id(), Some("<abc@cam>"));
        assert_eq!(msg.text_body().as_deref(), Some("Motion DetectStart on ch=1"));
        assert_eq!(msg.root.leaves().len(), 3);
    }

    #[test]
    fn test_image_attachments() {
        let msg = Message::parse(CAMERA_MAIL).unwrap();
        let images = msg.image_attachments();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].filename, "snap.jpg");
        assert_eq!(images[0].content_type, "image/jpeg");
        assert_eq!(&images[0].data[..4], &[0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(images[1].filename, "second.PNG");
        assert_eq!(&images[1].data[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_unnamed_image_gets_synthetic_name() {
        let raw = b"Content-Type: image/png\r\nContent-Transfer-Encoding: base64\r\n\r\niVBORw0K\r\n";
        let images = Message::parse(raw).unwrap().image_attachments();
        assert_eq!(images[0].filename, "attachment-0.png");
    }

    #[test]
    fn test_broken_base64_yields_empty_data() {
        let raw = b"Content-Type: image/jpeg\r\nContent-Transfer-Encoding: base64\r\n\r\n!!!\r\n";
        let images = Message::parse(raw).unwrap().image_attachments();
        assert!(images[0].data.is_empty());
    }

    #[test]
    fn test_missing_boundary_is_error() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\nbody\r\n";
        assert!(matches!(Message::parse(raw), Err(Error::MissingBoundary)));
    }

    #[test]
    fn test_truncated_multipart_tolerated() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n--b\r\nContent-Type: image/png\r\n\r\nxx";
        let msg = Message::parse(raw).unwrap();
        assert_eq!(msg.image_attachments()[0].data, b"xx");
    }

    #[test]
    fn test_plain_message_has_no_images() {
        let msg = Message::parse(b"Subject: hi\r\n\r\nMotion DetectStart\r\n").unwrap();
        assert!(msg.image_attachments().is_empty());
        assert_eq!(msg.text_body().as_deref(), Some("Motion DetectStart\r\n"));
    }

    #[test]
    fn test_image_extension() {
        assert!(has_image_extension("a.JPG"));
        assert!(has_image_extension("b.jpeg"));
        assert!(!has_image_extension("c.gif"));
        assert!(!has_image_extension("png"));
    }
}
