//! Domain types shared by the pipeline components.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Stable, source-assigned identifier. The ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    /// Wraps an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to one attachment of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRef {
    /// Attachment file name.
    pub filename: String,
    /// Size in bytes as reported by the source.
    pub size: u64,
}

/// A candidate unit of work, as enumerated by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Ledger key.
    pub id: ItemId,
    /// Source-local handle (IMAP UID, file path).
    pub locator: String,
    /// When the source received the item.
    pub received_at: DateTime<Utc>,
    /// Attachments, in source order.
    pub payload_refs: Vec<PayloadRef>,
    /// Mail subject or file name.
    pub subject: String,
}

/// Downloaded bytes for one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Attachment file name.
    pub filename: String,
    /// Declared MIME type, if the source knows it.
    pub content_type: Option<String>,
    /// Size the source promised, if known.
    pub expected_size: Option<u64>,
    /// The bytes.
    pub data: Vec<u8>,
}

impl Payload {
    /// Returns a reason if the payload cannot possibly decode.
    #[must_use]
    pub fn defect(&self) -> Option<String> {
        if self.data.is_empty() {
            return Some(format!("{} is empty", self.filename));
        }
        if let Some(expected) = self.expected_size
            && (self.data.len() as u64) < expected
        {
            return Some(format!(
                "{} truncated: {} of {expected} bytes",
                self.filename,
                self.data.len()
            ));
        }
        if let Some(ct) = &self.content_type
            && !ct.starts_with("image/")
            && ct != "application/octet-stream"
        {
            return Some(format!("{} is {ct}, not an image", self.filename));
        }
        None
    }
}

/// Result of classifying one image.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// A target label at or above the threshold.
    Positive {
        /// Detected label.
        label: String,
        /// Detector confidence in `[0, 1]`.
        confidence: f32,
    },
    /// No target label qualified.
    Negative,
    /// The detector could not decide (error or timeout).
    Inconclusive(String),
}

/// How an item left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMarker {
    /// An alert was sent.
    Alerted,
    /// Nothing of interest was found.
    Discarded,
    /// A detection was made but the alert could not be delivered.
    AlertFailed,
    /// Given up after repeated decode or inference failures.
    Abandoned,
}

impl LedgerMarker {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alerted => "alerted",
            Self::Discarded => "discarded",
            Self::AlertFailed => "alert_failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alerted" => Some(Self::Alerted),
            "discarded" => Some(Self::Discarded),
            "alert_failed" => Some(Self::AlertFailed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved item, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Item identifier.
    pub item_id: ItemId,
    /// Final disposition.
    pub marker: LedgerMarker,
    /// When the disposition was recorded.
    pub resolved_at: DateTime<Utc>,
    /// Free-form detail (label and confidence, failure reason).
    pub detail: String,
}

/// What processing one item achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Alert sent, ledger written, item acknowledged.
    Alerted,
    /// Nothing found (or abandoned), ledger written, item acknowledged.
    Discarded,
    /// Left at the source for a later cycle.
    Deferred(String),
    /// Detection made but delivery failed; ledger written, item acknowledged.
    AlertFailed(String),
}

/// Candidate selection criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    /// Only items received within this window.
    pub lookback: Duration,
    /// Trigger phrase the item must contain.
    pub keyword: Option<String>,
    /// Only items the source reports as unread.
    pub unseen_only: bool,
}

impl ItemFilter {
    /// Start of the lookback window relative to `now`.
    #[must_use]
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lookback)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// How an item is acknowledged at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Remove the item.
    Delete,
    /// Keep the item but mark it handled.
    MarkSeen,
}

/// Source connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Session being established.
    Connecting,
    /// Session usable.
    Ready,
    /// Session failed and must be replaced.
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(data: &[u8], expected: Option<u64>, ct: Option<&str>) -> Payload {
        Payload {
            filename: "snap.jpg".into(),
            content_type: ct.map(Into::into),
            expected_size: expected,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_payload_defects() {
        assert!(payload(b"", None, None).defect().unwrap().contains("empty"));
        assert!(payload(b"abc", Some(10), None).defect().unwrap().contains("truncated"));
        assert!(
            payload(b"abc", None, Some("text/plain"))
                .defect()
                .unwrap()
                .contains("not an image")
        );
        assert!(payload(b"abc", Some(3), Some("image/jpeg")).defect().is_none());
    }

    #[test]
    fn test_marker_round_trip() {
        for marker in [
            LedgerMarker::Alerted,
            LedgerMarker::Discarded,
            LedgerMarker::AlertFailed,
            LedgerMarker::Abandoned,
        ] {
            assert_eq!(LedgerMarker::parse(marker.as_str()), Some(marker));
        }
        assert_eq!(LedgerMarker::parse("bogus"), None);
    }

    #[test]
    fn test_filter_since() {
        let filter = ItemFilter {
            lookback: Duration::from_secs(3600),
            keyword: None,
            unseen_only: false,
        };
        let now = DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(filter.since(now).to_rfc3339(), "2026-10-16T11:00:00+00:00");
    }
}
