//! Fixed-interval poll loop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::Result;
use crate::connection::{Connection, ConnectionManager};
use crate::lister::ItemLister;
use crate::model::{AckMode, ItemFilter, Resolution};
use crate::notifier::Notifier;
use crate::processor::{ItemProcessor, acknowledge};
use crate::source::Source;

/// Wakes the scheduler for an immediate cycle.
///
/// A trigger fired while a cycle is running starts the next cycle as soon
/// as the current one ends.
#[derive(Debug, Clone, Default)]
pub struct CycleTrigger(Arc<Notify>);

impl CycleTrigger {
    /// Creates a trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a cycle.
    pub fn fire(&self) {
        self.0.notify_one();
    }

    /// Waits until a cycle is requested.
    pub async fn fired(&self) {
        self.0.notified().await;
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Candidates returned by the source.
    pub listed: usize,
    /// Candidates the ledger already knew.
    pub already_resolved: usize,
    /// Alerts sent.
    pub alerted: usize,
    /// Items discarded or abandoned.
    pub discarded: usize,
    /// Items left for a later cycle.
    pub deferred: usize,
    /// Detections whose alert could not be delivered.
    pub alert_failed: usize,
}

impl CycleReport {
    fn count(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Alerted => self.alerted += 1,
            Resolution::Discarded => self.discarded += 1,
            Resolution::Deferred(_) => self.deferred += 1,
            Resolution::AlertFailed(_) => self.alert_failed += 1,
        }
    }
}

/// Runs cycles until shut down.
#[derive(Debug)]
pub struct PollScheduler<S: Source, N> {
    manager: ConnectionManager<S>,
    lister: ItemLister,
    processor: ItemProcessor<N>,
    filter: ItemFilter,
    ack_mode: AckMode,
    interval: Duration,
    trigger: CycleTrigger,
}

impl<S: Source, N: Notifier> PollScheduler<S, N> {
    /// Creates a scheduler.
    pub const fn new(
        manager: ConnectionManager<S>,
        lister: ItemLister,
        processor: ItemProcessor<N>,
        filter: ItemFilter,
        ack_mode: AckMode,
        interval: Duration,
        trigger: CycleTrigger,
    ) -> Self {
        Self {
            manager,
            lister,
            processor,
            filter,
            ack_mode,
            interval,
            trigger,
        }
    }

    /// Loops until `shutdown` resolves.
    ///
    /// A failed cycle is logged and the loop carries on after the usual
    /// interval. Shutdown also interrupts a running cycle; its session is
    /// dropped, and anything not yet in the ledger is listed again on the
    /// next start.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        tracing::info!(
            source = %self.manager.source().describe(),
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            let started = Instant::now();
            let result = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested mid-cycle, abandoning it");
                    break;
                }
                result = self.run_cycle() => result,
            };
            match result {
                Ok(report) => tracing::info!(
                    listed = report.listed,
                    already_resolved = report.already_resolved,
                    alerted = report.alerted,
                    discarded = report.discarded,
                    deferred = report.deferred,
                    alert_failed = report.alert_failed,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Cycle finished"
                ),
                Err(e) => tracing::error!(error = %e, "Cycle failed"),
            }

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.interval) => {}
                () = self.trigger.fired() => tracing::info!("Cycle triggered manually"),
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Runs one cycle: acquire, list, process, release.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached, or if listing or
    /// processing has to abort.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut conn = self.manager.acquire().await?;
        let result = Self::drive(
            &mut conn,
            &self.lister,
            &self.processor,
            &self.filter,
            self.ack_mode,
        )
        .await;
        conn.release().await;
        result
    }

    async fn drive(
        conn: &mut Connection<'_, S>,
        lister: &ItemLister,
        processor: &ItemProcessor<N>,
        filter: &ItemFilter,
        ack_mode: AckMode,
    ) -> Result<CycleReport> {
        let listing = lister.list(conn, filter).await?;
        let mut report = CycleReport {
            listed: listing.pending.len() + listing.already_resolved.len(),
            already_resolved: listing.already_resolved.len(),
            ..CycleReport::default()
        };

        for item in &listing.already_resolved {
            tracing::debug!(item_id = %item.id, "Re-acknowledging resolved item");
            acknowledge(conn, item, ack_mode).await?;
        }

        for item in &listing.pending {
            let resolution = processor.process(conn, item).await?;
            report.count(&resolution);
        }

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut report = CycleReport::default();
        report.count(&Resolution::Alerted);
        report.count(&Resolution::Deferred("empty".into()));
        report.count(&Resolution::Deferred("empty".into()));
        report.count(&Resolution::AlertFailed("421".into()));
        assert_eq!(
            report,
            CycleReport {
                alerted: 1,
                deferred: 2,
                alert_failed: 1,
                ..CycleReport::default()
            }
        );
    }

    #[tokio::test]
    async fn test_trigger_stores_permit() {
        let trigger = CycleTrigger::new();
        trigger.clone().fire();
        tokio::time::timeout(Duration::from_secs(1), trigger.fired())
            .await
            .unwrap();
    }
}
