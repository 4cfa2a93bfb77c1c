//! Deduplication ledger.
//!
//! Records the final disposition of every resolved item, plus the
//! consecutive-failure counters of items that are still being retried. Both
//! survive restarts.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;
use crate::model::{ItemId, LedgerEntry, LedgerMarker};

/// `SQLite`-backed ledger. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Opens (creating if needed) the ledger at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let ledger = Self { pool };
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Creates an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let ledger = Self { pool };
        ledger.initialize().await?;
        Ok(ledger)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                item_id TEXT PRIMARY KEY,
                marker TEXT NOT NULL,
                resolved_at TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT ''
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS deferrals (
                item_id TEXT PRIMARY KEY,
                attempts INTEGER NOT NULL,
                last_reason TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns true if the item has been resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn contains(&self, id: &ItemId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM ledger_entries WHERE item_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Looks up the entry for an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: &ItemId) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            r"
            SELECT item_id, marker, resolved_at, detail
            FROM ledger_entries
            WHERE item_id = ?
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            let marker: String = row.get("marker");
            let resolved_at: String = row.get("resolved_at");
            Some(LedgerEntry {
                item_id: ItemId::new(row.get::<String, _>("item_id")),
                marker: LedgerMarker::parse(&marker)?,
                resolved_at: DateTime::parse_from_rfc3339(&resolved_at)
                    .ok()?
                    .with_timezone(&Utc),
                detail: row.get("detail"),
            })
        }))
    }

    /// Records the final disposition of an item and clears its deferral
    /// counter.
    ///
    /// The first record for an id wins; later records are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record(&self, id: &ItemId, marker: LedgerMarker, detail: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO ledger_entries (item_id, marker, resolved_at, detail)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(item_id) DO NOTHING
            ",
        )
        .bind(id.as_str())
        .bind(marker.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(detail)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM deferrals WHERE item_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(item_id = %id, %marker, "Ledger entry recorded");
        Ok(())
    }

    /// Counts one more failed attempt for an item and returns the total.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_deferral(&self, id: &ItemId, reason: &str) -> Result<u32> {
        let row = sqlx::query(
            r"
            INSERT INTO deferrals (item_id, attempts, last_reason, updated_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                attempts = attempts + 1,
                last_reason = excluded.last_reason,
                updated_at = excluded.updated_at
            RETURNING attempts
            ",
        )
        .bind(id.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let attempts: i64 = row.get("attempts");
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    /// Returns the current consecutive-failure count for an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn deferrals(&self, id: &ItemId) -> Result<u32> {
        let row = sqlx::query("SELECT attempts FROM deferrals WHERE item_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map_or(0, |row| {
            u32::try_from(row.get::<i64, _>("attempts")).unwrap_or(u32::MAX)
        }))
    }

    /// Lists entries with the given marker, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self, marker: LedgerMarker) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r"
            SELECT item_id, resolved_at, detail
            FROM ledger_entries
            WHERE marker = ?
            ORDER BY resolved_at DESC
            ",
        )
        .bind(marker.as_str())
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .filter_map(|row| {
                let resolved_at: String = row.get("resolved_at");
                Some(LedgerEntry {
                    item_id: ItemId::new(row.get::<String, _>("item_id")),
                    marker,
                    resolved_at: DateTime::parse_from_rfc3339(&resolved_at)
                        .ok()?
                        .with_timezone(&Utc),
                    detail: row.get("detail"),
                })
            })
            .collect();

        Ok(entries)
    }
}
