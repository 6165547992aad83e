//! Integration tests for the bymcp-store crate against an on-disk
//! database.

use bymcp_store::{Database, TransferStatus, TransferStore};

#[tokio::test]
async fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("idempotency.db");
    let key = TransferStore::idempotency_key("Erika Musterfrau", "2026-03", 312_450);

    {
        let db = Database::open_and_migrate(db_path.clone()).await.unwrap();
        let ledger = TransferStore::new(db);
        ledger
            .record_pending(&key, "Erika Musterfrau", "2026-03", 312_450)
            .await
            .unwrap();
        ledger.record_success(&key, Some("tr-42")).await.unwrap();
    }

    let db = Database::open_and_migrate(db_path).await.unwrap();
    let ledger = TransferStore::new(db);
    assert!(ledger.is_processed(&key).await.unwrap());

    let records = ledger.list(Some("2026-03")).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransferStatus::Success);
    assert_eq!(records[0].transfer_id.as_deref(), Some("tr-42"));
}

#[tokio::test]
async fn migrate_twice_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("twice.db");

    let _first = Database::open_and_migrate(db_path.clone()).await.unwrap();
    let second = Database::open_and_migrate(db_path).await.unwrap();
    let ledger = TransferStore::new(second);
    assert_eq!(ledger.count().await.unwrap(), 0);
}

fn _assert_send_sync<T: Send + Sync>() {}

#[test]
fn handles_are_send_sync() {
    _assert_send_sync::<Database>();
    _assert_send_sync::<TransferStore>();
}
