//! # bymcp-store
//!
//! Persistence for bymcp.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  TransferStore  (idempotency ledger)     │
//! │  StateFile<T>   (tokens, pending state)  │
//! ├──────────────────────────────────────────┤
//! │  Database (rusqlite WAL)                 │
//! │  Migrations (versioned, transactional)   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use bymcp_store::{Database, TransferStore};
//!
//! let db = Database::open_and_migrate("/home/me/.byMCP/idempotency.db").await?;
//! let ledger = TransferStore::new(db);
//! let key = TransferStore::idempotency_key("Max Mustermann", "2026-02", 250_000);
//! if !ledger.is_processed(&key).await? {
//!     ledger.record_pending(&key, "Max Mustermann", "2026-02", 250_000).await?;
//! }
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod state_file;
pub mod transfer_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use state_file::StateFile;
pub use transfer_store::{TransferRecord, TransferStatus, TransferStore};
