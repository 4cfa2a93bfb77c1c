//! Outgoing message generation.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::encoding::{encode_base64_wrapped, encode_quoted_printable, encode_rfc2047};
use crate::message::Attachment;

/// Builds an RFC 5322 message with a text body and optional attachments.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: String,
    to: Vec<String>,
    subject: String,
    date: Option<DateTime<Utc>>,
    text: String,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From address.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    /// Sets the subject. Non-ASCII text is encoded.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the Date header; defaults to now.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the plain-text body.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Attaches a file.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Renders the message with CRLF line endings.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let date = self.date.unwrap_or_else(Utc::now);
        let domain = self.from.rsplit_once('@').map_or("localhost", |(_, d)| d);

        let mut out = String::new();
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("To: {}\r\n", self.to.join(", ")));
        out.push_str(&format!("Subject: {}\r\n", encode_rfc2047(&self.subject)));
        out.push_str(&format!("Date: {}\r\n", date.to_rfc2822()));
        out.push_str(&format!("Message-ID: <{}@{domain}>\r\n", random_token(24)));
        out.push_str("MIME-Version: 1.0\r\n");

        if self.attachments.is_empty() {
            push_text_headers(&mut out);
            out.push_str("\r\n");
            out.push_str(&encode_quoted_printable(&self.text));
            out.push_str("\r\n");
            return out.into_bytes();
        }

        let boundary = format!("=_mw_{}", random_token(20));
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
        ));
        out.push_str("This is a multi-part message in MIME format.\r\n");

        out.push_str(&format!("--{boundary}\r\n"));
        push_text_headers(&mut out);
        out.push_str("\r\n");
        out.push_str(&encode_quoted_printable(&self.text));
        out.push_str("\r\n");

        for attachment in &self.attachments {
            let name = encode_rfc2047(&attachment.filename);
            out.push_str(&format!("--{boundary}\r\n"));
            out.push_str(&format!(
                "Content-Type: {}; name=\"{name}\"\r\n",
                attachment.content_type
            ));
            out.push_str("Content-Transfer-Encoding: base64\r\n");
            out.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n"
            ));
            out.push_str(&encode_base64_wrapped(&attachment.data));
        }
        out.push_str(&format!("--{boundary}--\r\n"));
        out.into_bytes()
    }
}

fn push_text_headers(out: &mut String) {
    out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    out.push_str("Content-Transfer-Encoding: quoted-printable\r\n");
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn alert() -> MessageBuilder {
        MessageBuilder::new()
            .from("cam@example.com")
            .to("me@example.com")
            .subject("person détecté")
            .text("Item: <abc@cam>\nConfidence: 0.91")
    }

    #[test]
    fn test_alert_with_attachment_parses_back() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let raw = alert()
            .attach(Attachment {
                filename: "snap.jpg".into(),
                content_type: "image/jpeg".into(),
                data: jpeg.clone(),
            })
            .build();

        let msg = Message::parse(&raw).unwrap();
        assert_eq!(msg.subject().as_deref(), Some("person détecté"));
        assert_eq!(msg.headers().get("to"), Some("me@example.com"));
        assert_eq!(
            msg.text_body().as_deref(),
            Some("Item: <abc@cam>\r\nConfidence: 0.91")
        );
        let images = msg.image_attachments();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "snap.jpg");
        assert_eq!(images[0].data, jpeg);
    }

    #[test]
    fn test_text_only_message() {
        let raw = String::from_utf8(alert().build()).unwrap();
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(!raw.contains("multipart"));
        assert!(raw.contains("Message-ID: <"));
        assert!(raw.contains("@example.com>\r\n"));
    }

    #[test]
    fn test_all_lines_crlf_terminated() {
        let raw = alert()
            .attach(Attachment {
                filename: "a.png".into(),
                content_type: "image/png".into(),
                data: vec![0; 300],
            })
            .build();
        for (i, b) in raw.iter().enumerate() {
            if *b == b'\n' {
                assert_eq!(raw[i - 1], b'\r');
            }
        }
    }
}
