//! `motionwatch` - camera snapshot alerting daemon
//!
//! Polls a mailbox or folder for motion snapshots, runs them through a
//! detector and emails an alert when a target is seen.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod liveness;

use std::sync::Arc;

use anyhow::{Context, Result};
use motionwatch_core::config::SourceSettings;
use motionwatch_core::{
    Config, ConnectionManager, CycleTrigger, DetectorAdapter, FolderSource, ImapSource,
    ItemLister, ItemProcessor, Ledger, ModelHandle, PollScheduler, ProcessorSettings,
    SmtpNotifier, Source,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motionwatch=info,motionwatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting motionwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("invalid configuration")?;
    match config.source.clone() {
        SourceSettings::Imap(settings) => run(ImapSource::new(settings), config).await,
        SourceSettings::Folder(dir) => run(FolderSource::new(dir), config).await,
    }
}

/// Wires the pipeline for one source and runs it until Ctrl-C.
async fn run<S: Source>(source: S, config: Config) -> Result<()> {
    let ledger = Ledger::new(&config.ledger_path)
        .await
        .with_context(|| format!("cannot open ledger at {}", config.ledger_path))?;

    let model = ModelHandle::load(
        &config.detection.inference_url,
        config.detection.labels_path.as_deref(),
    )
    .context("cannot load detection model")?;
    let detector = DetectorAdapter::new(
        Arc::new(model),
        config.detection.threshold,
        &config.detection.target_labels,
        config.retry.call_timeout,
    );
    let notifier = SmtpNotifier::new(config.smtp.clone()).context("invalid alert settings")?;

    let processor = ItemProcessor::new(
        detector,
        notifier,
        ledger.clone(),
        ProcessorSettings {
            ack_mode: config.ack_mode,
            max_deferrals: config.max_deferrals,
            retry: config.retry,
            timezone: config.timezone,
        },
    );

    let trigger = CycleTrigger::new();
    let listener = liveness::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Liveness endpoint listening");
    let server = tokio::spawn(liveness::serve(listener, trigger.clone()));

    let mut scheduler = PollScheduler::new(
        ConnectionManager::new(source, config.retry),
        ItemLister::new(ledger),
        processor,
        config.filter.clone(),
        config.ack_mode,
        config.poll_interval,
        trigger,
    );
    scheduler.run(shutdown_signal()).await;

    server.abort();
    info!("motionwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
