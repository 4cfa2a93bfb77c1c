//! Alert delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use motionwatch_mime::{Attachment, MessageBuilder};
use motionwatch_smtp::{Address, connect};

use crate::config::SmtpSettings;
use crate::model::{Payload, SourceItem};
use crate::{Error, Result};

/// Name announced in EHLO.
const CLIENT_NAME: &str = "motionwatch";

/// A rendered alert, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// The snapshot that triggered the alert.
    pub attachment: Attachment,
}

impl Alert {
    /// Renders the alert for a positive detection.
    ///
    /// The subject carries the label and the receive time in `tz`; the body
    /// carries enough provenance to find the item again.
    #[must_use]
    pub fn for_detection(
        item: &SourceItem,
        payload: &Payload,
        label: &str,
        confidence: f32,
        tz: Tz,
    ) -> Self {
        let when = local_time(item.received_at, tz);
        let subject = format!("{label} detected at {when}");
        let body = format!(
            "Detected: {label} (confidence {confidence:.2})\r\n\
             Item: {}\r\n\
             Source subject: {}\r\n\
             Received: {when}\r\n\
             Snapshot: {}\r\n",
            item.id, item.subject, payload.filename
        );
        Self {
            subject,
            body,
            attachment: Attachment {
                filename: payload.filename.clone(),
                content_type: payload
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                data: payload.data.clone(),
            },
        }
    }
}

fn local_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

/// Sends alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one alert. A single attempt; callers apply retries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dispatch`] if the alert was not accepted.
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Delivers alerts by SMTP with AUTH PLAIN.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    settings: SmtpSettings,
}

impl SmtpNotifier {
    /// Creates a notifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the sender or recipient is not a valid
    /// address.
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        for addr in [&settings.sender, &settings.recipient] {
            Address::new(addr.as_str()).map_err(|e| Error::Config(e.to_string()))?;
        }
        Ok(Self { settings })
    }

    fn render(&self, alert: &Alert) -> Vec<u8> {
        MessageBuilder::new()
            .from(&self.settings.sender)
            .to(&self.settings.recipient)
            .subject(&alert.subject)
            .text(&alert.body)
            .attach(alert.attachment.clone())
            .build()
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let s = &self.settings;
        let message = self.render(alert);

        let client = connect(&s.host, s.port, s.security, CLIENT_NAME)
            .await?
            .auth_plain(&s.username, s.password.expose())
            .await?;
        let client = client
            .send_mail(
                Address::new(s.sender.as_str())?,
                &[Address::new(s.recipient.as_str())?],
                &message,
            )
            .await?;
        if let Err(e) = client.quit().await {
            tracing::debug!(error = %e, "QUIT failed after delivery");
        }

        tracing::info!(recipient = %s.recipient, subject = %alert.subject, "Alert sent");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use motionwatch_smtp::Security;

    use super::*;
    use crate::config::Secret;
    use crate::model::{ItemId, PayloadRef};

    fn item() -> SourceItem {
        SourceItem {
            id: ItemId::new("<abc@cam>"),
            locator: "4".into(),
            received_at: Utc.with_ymd_and_hms(2026, 10, 16, 3, 4, 5).unwrap(),
            payload_refs: vec![PayloadRef {
                filename: "4.eml".into(),
                size: 10,
            }],
            subject: "Motion DetectStart".into(),
        }
    }

    fn payload() -> Payload {
        Payload {
            filename: "snap.jpg".into(),
            content_type: Some("image/jpeg".into()),
            expected_size: None,
            data: vec![0xFF, 0xD8, 0xFF],
        }
    }

    fn settings(port: u16) -> SmtpSettings {
        SmtpSettings {
            host: "127.0.0.1".into(),
            port,
            security: Security::None,
            username: "alerts".into(),
            password: Secret::new("pw"),
            sender: "alerts@example.com".into(),
            recipient: "me@example.com".into(),
        }
    }

    #[test]
    fn test_alert_subject_uses_timezone() {
        let alert = Alert::for_detection(&item(), &payload(), "person", 0.87, Tz::Asia__Tokyo);
        assert_eq!(alert.subject, "person detected at 2026-10-16 12:04:05 JST");
        assert!(alert.body.contains("Item: <abc@cam>"));
        assert!(alert.body.contains("Source subject: Motion DetectStart"));
        assert!(alert.body.contains("confidence 0.87"));
        assert!(alert.body.contains("Snapshot: snap.jpg"));
        assert_eq!(alert.attachment.data, payload().data);
        assert_eq!(alert.attachment.content_type, "image/jpeg");
    }

    #[test]
    fn test_rendered_message_carries_attachment() {
        let notifier = SmtpNotifier::new(settings(25)).unwrap();
        let alert = Alert::for_detection(&item(), &payload(), "cat", 0.6, Tz::UTC);
        let raw = String::from_utf8(notifier.render(&alert)).unwrap();
        assert!(raw.contains("Subject: cat detected at 2026-10-16 03:04:05 UTC"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("snap.jpg"));
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let mut s = settings(25);
        s.recipient = "nobody".into();
        assert!(matches!(SmtpNotifier::new(s), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_dispatch_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let notifier = SmtpNotifier::new(settings(port)).unwrap();
        let alert = Alert::for_detection(&item(), &payload(), "person", 0.9, Tz::UTC);
        assert!(matches!(notifier.send(&alert).await, Err(Error::Dispatch(_))));
    }
}
