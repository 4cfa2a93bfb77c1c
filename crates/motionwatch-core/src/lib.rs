//! # motionwatch-core
//!
//! The alerting pipeline behind `motionwatch`.
//!
//! This crate provides:
//! - **Sources** - IMAP mailboxes and local folders of camera snapshots
//! - **Connection management** - reconnect and re-issue under one retry policy
//! - **Deduplication ledger** - `SQLite` record of every resolved item
//! - **Detection** - threshold and label filtering over a black-box model
//! - **Alerts** - SMTP delivery with the snapshot attached
//! - **Scheduling** - fixed-interval cycles with failure isolation
//!
//! ## Cycle
//!
//! ```text
//! acquire ─→ list ─→ (ledger partition) ─→ process each ─→ release
//!                                          │
//!                     fetch → decode → detect → alert | discard | defer
//!                                          │
//!                               ledger write, then acknowledge
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod detector;
mod error;
pub mod ledger;
pub mod lister;
pub mod model;
pub mod notifier;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod source;

pub use config::Config;
pub use connection::{Connection, ConnectionManager};
pub use detector::{DecodedImage, Detection, DetectorAdapter, HttpInferenceBackend, InferenceBackend, ModelHandle};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use lister::{ItemLister, Listing};
pub use model::{
    AckMode, ConnectionState, DetectionOutcome, ItemFilter, ItemId, LedgerEntry, LedgerMarker,
    Payload, PayloadRef, Resolution, SourceItem,
};
pub use notifier::{Alert, Notifier, SmtpNotifier};
pub use processor::{ItemProcessor, ProcessorSettings};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{CycleReport, CycleTrigger, PollScheduler};
pub use source::{FolderSource, ImapSource, Source, SourceSession};
