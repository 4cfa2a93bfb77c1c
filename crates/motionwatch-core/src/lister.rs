//! Builds the ordered work list for a cycle.

use std::collections::HashSet;

use chrono::Utc;

use crate::Result;
use crate::connection::Connection;
use crate::ledger::Ledger;
use crate::model::{ItemFilter, SourceItem};
use crate::source::Source;

/// Candidates partitioned against the ledger, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Items still needing a decision.
    pub pending: Vec<SourceItem>,
    /// Items the ledger already resolved but the source still shows.
    pub already_resolved: Vec<SourceItem>,
}

/// Lists candidates without changing anything at the source.
#[derive(Debug, Clone)]
pub struct ItemLister {
    ledger: Ledger,
}

impl ItemLister {
    /// Creates a lister backed by `ledger`.
    #[must_use]
    pub const fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Lists, deduplicates, orders and partitions candidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the source listing or a ledger lookup fails.
    pub async fn list<S: Source>(
        &self,
        connection: &mut Connection<'_, S>,
        filter: &ItemFilter,
    ) -> Result<Listing> {
        let since = filter.since(Utc::now());
        let mut items = connection.list(filter).await?;
        items.retain(|item| item.received_at >= since);
        let items = order_and_dedup(items);

        let mut listing = Listing::default();
        for item in items {
            if self.ledger.contains(&item.id).await? {
                listing.already_resolved.push(item);
            } else {
                listing.pending.push(item);
            }
        }

        tracing::debug!(
            pending = listing.pending.len(),
            already_resolved = listing.already_resolved.len(),
            "Candidates listed"
        );
        Ok(listing)
    }
}

/// Sorts oldest first (ties by id) and keeps the first item per id.
fn order_and_dedup(mut items: Vec<SourceItem>) -> Vec<SourceItem> {
    items.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.id.clone()));
    items
}
