//! Transfer ledger.
//!
//! Every salary transfer is recorded under an idempotency key derived
//! from the employee name, the pay period, and the amount. A transfer
//! whose key is already `success` is never submitted twice, and the same
//! key is forwarded to the bank as its idempotency header.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Success,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown transfer status: {other}"
            ))),
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub idempotency_key: String,
    pub employee_name: String,
    /// Pay period as `YYYY-MM`.
    pub period: String,
    pub amount_cents: i64,
    pub status: TransferStatus,
    /// Bank-side transfer id, set once the transfer succeeded.
    pub transfer_id: Option<String>,
    /// Failure reason of the most recent attempt.
    pub last_error: Option<String>,
    /// RFC 3339 UTC timestamp.
    pub created_at: String,
    pub updated_at: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  TransferStore
// ═══════════════════════════════════════════════════════════════════════

/// Idempotency ledger for outgoing transfers.
#[derive(Clone)]
pub struct TransferStore {
    db: Database,
}

impl TransferStore {
    /// Create a new ledger backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Derive the idempotency key for a transfer.
    ///
    /// Hex SHA-256 of `"{name}|{period}|{amount_cents}"` where the name is
    /// trimmed and lower-cased, so `" Max Müller "` and `"max müller"`
    /// share a key.
    pub fn idempotency_key(employee_name: &str, period: &str, amount_cents: i64) -> String {
        let raw = format!(
            "{}|{}|{}",
            employee_name.trim().to_lowercase(),
            period,
            amount_cents
        );
        let digest = ring::digest::digest(&ring::digest::SHA256, raw.as_bytes());
        hex::encode(digest.as_ref())
    }

    /// Whether the transfer behind `key` already completed successfully.
    #[instrument(skip(self))]
    pub async fn is_processed(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .get(key)
            .await?
            .is_some_and(|record| record.status == TransferStatus::Success))
    }

    /// Insert a pending entry, or reset an existing one to pending.
    ///
    /// `created_at` of an existing row is kept.
    #[instrument(skip(self))]
    pub async fn record_pending(
        &self,
        key: &str,
        employee_name: &str,
        period: &str,
        amount_cents: i64,
    ) -> StoreResult<()> {
        let key = key.to_string();
        let employee_name = employee_name.to_string();
        let period = period.to_string();
        let now = Utc::now().to_rfc3339();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO transfers (idempotency_key, employee_name, period, amount_cents, status, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5) \
                     ON CONFLICT(idempotency_key) DO UPDATE SET status = 'pending', updated_at = excluded.updated_at",
                    rusqlite::params![key, employee_name, period, amount_cents, now],
                )?;
                debug!(key = %key, "transfer recorded as pending");
                Ok(())
            })
            .await
    }

    /// Mark a transfer as successful.
    #[instrument(skip(self))]
    pub async fn record_success(&self, key: &str, transfer_id: Option<&str>) -> StoreResult<()> {
        let key = key.to_string();
        let transfer_id = transfer_id.map(str::to_string);
        let id = key.clone();
        self.update(key, move |conn, now| {
            Ok(conn.execute(
                "UPDATE transfers SET status = 'success', transfer_id = ?1, last_error = NULL, updated_at = ?2 \
                 WHERE idempotency_key = ?3",
                rusqlite::params![transfer_id, now, id],
            )?)
        })
        .await
    }

    /// Mark a transfer as failed, keeping the reason.
    #[instrument(skip(self, error))]
    pub async fn record_failure(&self, key: &str, error: &str) -> StoreResult<()> {
        let key = key.to_string();
        let error = error.to_string();
        let id = key.clone();
        self.update(key, move |conn, now| {
            Ok(conn.execute(
                "UPDATE transfers SET status = 'failed', last_error = ?1, updated_at = ?2 \
                 WHERE idempotency_key = ?3",
                rusqlite::params![error, now, id],
            )?)
        })
        .await
    }

    /// Fetch a single entry by key.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> StoreResult<Option<TransferRecord>> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {COLUMNS} FROM transfers WHERE idempotency_key = ?1"),
                    rusqlite::params![key],
                    TransferRow::from_row,
                );
                match result {
                    Ok(row) => row.into_record().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List entries, optionally restricted to one period.
    ///
    /// A single period is ordered newest first; the full ledger is ordered
    /// by period, then creation time, both descending.
    #[instrument(skip(self))]
    pub async fn list(&self, period: Option<&str>) -> StoreResult<Vec<TransferRecord>> {
        let period = period.map(str::to_string);
        self.db
            .execute(move |conn| {
                let rows = match period {
                    Some(period) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {COLUMNS} FROM transfers WHERE period = ?1 ORDER BY created_at DESC"
                        ))?;
                        stmt.query_map(rusqlite::params![period], TransferRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {COLUMNS} FROM transfers ORDER BY period DESC, created_at DESC"
                        ))?;
                        stmt.query_map([], TransferRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                };
                rows.into_iter().map(TransferRow::into_record).collect()
            })
            .await
    }

    /// Total number of ledger entries.
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM transfers", [], |row| row.get(0))?)
            })
            .await
    }

    async fn update<F>(&self, key: String, f: F) -> StoreResult<()>
    where
        F: FnOnce(&rusqlite::Connection, String) -> StoreResult<usize> + Send + 'static,
    {
        let now = Utc::now().to_rfc3339();
        self.db
            .execute(move |conn| {
                let changed = f(conn, now)?;
                if changed == 0 {
                    return Err(StoreError::NotFound {
                        entity: "transfer",
                        id: key,
                    });
                }
                Ok(())
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

const COLUMNS: &str = "idempotency_key, employee_name, period, amount_cents, status, \
                       transfer_id, last_error, created_at, updated_at";

struct TransferRow {
    idempotency_key: String,
    employee_name: String,
    period: String,
    amount_cents: i64,
    status: String,
    transfer_id: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TransferRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            idempotency_key: row.get(0)?,
            employee_name: row.get(1)?,
            period: row.get(2)?,
            amount_cents: row.get(3)?,
            status: row.get(4)?,
            transfer_id: row.get(5)?,
            last_error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> StoreResult<TransferRecord> {
        Ok(TransferRecord {
            idempotency_key: self.idempotency_key,
            employee_name: self.employee_name,
            period: self.period,
            amount_cents: self.amount_cents,
            status: self.status.parse()?,
            transfer_id: self.transfer_id,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> TransferStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        TransferStore::new(db)
    }

    #[test]
    fn key_is_stable_and_normalises_name() {
        let a = TransferStore::idempotency_key("Max Mustermann", "2026-02", 250_000);
        let b = TransferStore::idempotency_key("  max mustermann ", "2026-02", 250_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_depends_on_period_and_amount() {
        let base = TransferStore::idempotency_key("Max", "2026-02", 100);
        assert_ne!(base, TransferStore::idempotency_key("Max", "2026-03", 100));
        assert_ne!(base, TransferStore::idempotency_key("Max", "2026-02", 101));
    }

    #[test]
    fn key_matches_known_digest() {
        assert_eq!(
            TransferStore::idempotency_key("Max Mustermann", "2026-02", 250_000),
            "8c6e9ddfa0f72997021f9ce0af0fe6ae78ced831cb9d462e86fbe76e95470fc5"
        );
    }

    #[tokio::test]
    async fn pending_is_not_processed() {
        let store = setup_store().await;
        let key = TransferStore::idempotency_key("Max", "2026-02", 100);
        store.record_pending(&key, "Max", "2026-02", 100).await.unwrap();

        assert!(!store.is_processed(&key).await.unwrap());
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, TransferStatus::Pending);
        assert_eq!(record.amount_cents, 100);
    }

    #[tokio::test]
    async fn success_marks_processed() {
        let store = setup_store().await;
        let key = TransferStore::idempotency_key("Max", "2026-02", 100);
        store.record_pending(&key, "Max", "2026-02", 100).await.unwrap();
        store.record_success(&key, Some("tr-1")).await.unwrap();

        assert!(store.is_processed(&key).await.unwrap());
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.transfer_id.as_deref(), Some("tr-1"));
    }

    #[tokio::test]
    async fn failure_keeps_reason_and_can_be_retried() {
        let store = setup_store().await;
        let key = TransferStore::idempotency_key("Max", "2026-02", 100);
        store.record_pending(&key, "Max", "2026-02", 100).await.unwrap();
        store.record_failure(&key, "insufficient funds").await.unwrap();

        let failed = store.get(&key).await.unwrap().unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("insufficient funds"));
        assert!(!store.is_processed(&key).await.unwrap());

        store.record_pending(&key, "Max", "2026-02", 100).await.unwrap();
        let retried = store.get(&key).await.unwrap().unwrap();
        assert_eq!(retried.status, TransferStatus::Pending);
        assert_eq!(retried.created_at, failed.created_at);
    }

    #[tokio::test]
    async fn updating_unknown_key_is_not_found() {
        let store = setup_store().await;
        let err = store.record_success("missing", None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_key_is_not_processed() {
        let store = setup_store().await;
        assert!(!store.is_processed("nope").await.unwrap());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_period() {
        let store = setup_store().await;
        for (name, period) in [("A", "2026-01"), ("B", "2026-02"), ("C", "2026-02")] {
            let key = TransferStore::idempotency_key(name, period, 1);
            store.record_pending(&key, name, period, 1).await.unwrap();
        }

        let feb = store.list(Some("2026-02")).await.unwrap();
        assert_eq!(feb.len(), 2);
        assert!(feb.iter().all(|r| r.period == "2026-02"));

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].period, "2026-02");
        assert_eq!(all[2].period, "2026-01");
        assert_eq!(store.count().await.unwrap(), 3);
    }
}
