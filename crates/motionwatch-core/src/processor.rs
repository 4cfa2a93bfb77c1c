//! Resolves one item: download, decode, detect, then alert or discard.
//!
//! Every terminal path writes the ledger before acknowledging the item at
//! the source, so a crash in between can cause a redundant acknowledgment
//! but never a second alert.

use chrono_tz::Tz;

use crate::connection::Connection;
use crate::detector::{DecodedImage, DetectorAdapter};
use crate::ledger::Ledger;
use crate::model::{AckMode, DetectionOutcome, LedgerMarker, Payload, Resolution, SourceItem};
use crate::notifier::{Alert, Notifier};
use crate::retry::RetryPolicy;
use crate::source::Source;
use crate::Result;

/// Processing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// How resolved items are acknowledged.
    pub ack_mode: AckMode,
    /// Failed cycles before an item is abandoned.
    pub max_deferrals: u32,
    /// Supplies the deadline for the single alert send.
    pub retry: RetryPolicy,
    /// Time zone for alert timestamps.
    pub timezone: Tz,
}

/// Turns pending items into resolutions.
#[derive(Debug)]
pub struct ItemProcessor<N> {
    detector: DetectorAdapter,
    notifier: N,
    ledger: Ledger,
    settings: ProcessorSettings,
}

/// Best positive detection across an item's payloads.
struct Hit<'p> {
    payload: &'p Payload,
    label: String,
    confidence: f32,
}

impl<N: Notifier> ItemProcessor<N> {
    /// Creates a processor.
    pub const fn new(
        detector: DetectorAdapter,
        notifier: N,
        ledger: Ledger,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            detector,
            notifier,
            ledger,
            settings,
        }
    }

    /// Resolves one pending item.
    ///
    /// # Errors
    ///
    /// Returns an error only when the cycle cannot continue: the source
    /// connection is lost for good, or the ledger cannot be written.
    pub async fn process<S: Source>(
        &self,
        conn: &mut Connection<'_, S>,
        item: &SourceItem,
    ) -> Result<Resolution> {
        let payloads = match conn.fetch(item).await {
            Ok(payloads) => payloads,
            Err(e) if e.is_connection_level() => return Err(e),
            Err(e) => return self.defer(conn, item, e.to_string()).await,
        };

        let mut problems = Vec::new();
        let mut best: Option<Hit<'_>> = None;

        if payloads.is_empty() {
            problems.push("no image payload".to_string());
        }
        for payload in &payloads {
            let image = match DecodedImage::decode(payload) {
                Ok(image) => image,
                Err(e) => {
                    problems.push(e.to_string());
                    continue;
                }
            };
            match self.detector.classify(&image).await {
                DetectionOutcome::Positive { label, confidence } => {
                    if best.as_ref().is_none_or(|b| confidence > b.confidence) {
                        best = Some(Hit {
                            payload,
                            label,
                            confidence,
                        });
                    }
                }
                DetectionOutcome::Negative => {}
                DetectionOutcome::Inconclusive(reason) => problems.push(reason),
            }
        }

        if let Some(hit) = best {
            return self.dispatch(conn, item, &hit).await;
        }
        if !problems.is_empty() {
            return self.defer(conn, item, problems.join("; ")).await;
        }

        self.resolve(conn, item, LedgerMarker::Discarded, "no target detected")
            .await?;
        tracing::info!(item_id = %item.id, "Nothing detected, discarded");
        Ok(Resolution::Discarded)
    }

    async fn dispatch<S: Source>(
        &self,
        conn: &mut Connection<'_, S>,
        item: &SourceItem,
        hit: &Hit<'_>,
    ) -> Result<Resolution> {
        let alert = Alert::for_detection(
            item,
            hit.payload,
            &hit.label,
            hit.confidence,
            self.settings.timezone,
        );
        let detail = format!("{} {:.2}", hit.label, hit.confidence);

        // One attempt only: a send that timed out may still have been
        // delivered, and a second attempt could duplicate the alert.
        let sent = self
            .settings
            .retry
            .timed("send", self.notifier.send(&alert))
            .await;

        match sent {
            Ok(()) => {
                self.resolve(conn, item, LedgerMarker::Alerted, &detail).await?;
                tracing::info!(
                    item_id = %item.id,
                    label = %hit.label,
                    confidence = hit.confidence,
                    "Alert dispatched"
                );
                Ok(Resolution::Alerted)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(item_id = %item.id, error = %reason, "Alert could not be delivered");
                self.resolve(conn, item, LedgerMarker::AlertFailed, &format!("{detail}: {reason}"))
                    .await?;
                Ok(Resolution::AlertFailed(reason))
            }
        }
    }

    async fn defer<S: Source>(
        &self,
        conn: &mut Connection<'_, S>,
        item: &SourceItem,
        reason: String,
    ) -> Result<Resolution> {
        let attempts = self.ledger.record_deferral(&item.id, &reason).await?;
        if attempts >= self.settings.max_deferrals {
            tracing::warn!(
                item_id = %item.id,
                attempts,
                reason = %reason,
                "Giving up on item"
            );
            self.resolve(conn, item, LedgerMarker::Abandoned, &reason).await?;
            return Ok(Resolution::Discarded);
        }
        tracing::warn!(
            item_id = %item.id,
            attempts,
            max = self.settings.max_deferrals,
            reason = %reason,
            "Item deferred"
        );
        Ok(Resolution::Deferred(reason))
    }

    /// Writes the ledger, then acknowledges at the source.
    async fn resolve<S: Source>(
        &self,
        conn: &mut Connection<'_, S>,
        item: &SourceItem,
        marker: LedgerMarker,
        detail: &str,
    ) -> Result<()> {
        self.ledger.record(&item.id, marker, detail).await?;
        acknowledge(conn, item, self.settings.ack_mode).await
    }
}

/// Acknowledges an item whose ledger entry is already written.
///
/// A refused acknowledgment is logged and left for the next cycle, which
/// will see the item as already resolved and try again.
///
/// # Errors
///
/// Returns an error only if the connection is lost for good.
pub async fn acknowledge<S: Source>(
    conn: &mut Connection<'_, S>,
    item: &SourceItem,
    mode: AckMode,
) -> Result<()> {
    match conn.acknowledge(item, mode).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_connection_level() => Err(e),
        Err(e) => {
            tracing::warn!(item_id = %item.id, error = %e, "Acknowledgment refused");
            Ok(())
        }
    }
}
