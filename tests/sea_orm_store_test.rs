//! SeaORM store against in-memory SQLite.
#![cfg(feature = "database")]

use chrono::{Duration, TimeZone, Utc};
use gatesync::ledger::ChargeRequest;
use gatesync::storage::migration::{Migrator, rollback_migration, run_migrations};
use gatesync::storage::{LocalRecordFields, SyncStore};
use gatesync::{
    EntryStatus, GatewayId, LedgerWriter, PaymentMethod, RecordKind, SeaOrmSyncStore, TierSchedule,
};
use rust_decimal::Decimal;
use sea_orm_migration::MigratorTrait;
use std::str::FromStr;
use std::sync::Arc;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn store() -> SeaOrmSyncStore {
    let store = SeaOrmSyncStore::connect("sqlite::memory:")
        .await
        .expect("Failed to open SQLite");
    run_migrations::<Migrator>(store.connection())
        .await
        .expect("Failed to migrate");
    store
}

fn fields(external_id: &str, status: &str, amount: &str) -> LocalRecordFields {
    LocalRecordFields {
        gateway: GatewayId::MercadoPago,
        kind: RecordKind::Payment,
        external_id: external_id.to_string(),
        status: status.to_string(),
        amount: dec(amount),
        currency: "BRL".to_string(),
        payment_method: Some(PaymentMethod::Pix),
        customer_ref: Some("cus_9".to_string()),
        occurred_at: Utc.with_ymd_and_hms(2024, 7, 4, 15, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn test_migrations_have_distinct_names_and_rerun_cleanly() {
    let store = store().await;
    let db = store.connection();

    let applied: Vec<String> = Migrator::get_applied_migrations(db)
        .await
        .unwrap()
        .iter()
        .map(|m| m.name().to_string())
        .collect();
    assert_eq!(
        applied,
        vec![
            "m20240101_000001_create_gateway_records",
            "m20240101_000002_create_ledger_entries",
        ]
    );

    run_migrations::<Migrator>(db).await.unwrap();
    assert!(Migrator::get_pending_migrations(db).await.unwrap().is_empty());

    rollback_migration::<Migrator>(db, Some(1)).await.unwrap();
    assert_eq!(Migrator::get_pending_migrations(db).await.unwrap().len(), 1);
    run_migrations::<Migrator>(db).await.unwrap();
    assert!(Migrator::get_pending_migrations(db).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upsert_keeps_one_row_per_external_id() {
    let store = store().await;

    let created = store.upsert_local(&fields("mp_1", "pending", "12.34")).await.unwrap();
    let updated = store.upsert_local(&fields("mp_1", "approved", "12.34")).await.unwrap();
    store.upsert_local(&fields("mp_2", "approved", "5.00")).await.unwrap();

    assert_eq!(created.id, updated.id);
    assert_eq!(updated.status, "approved");
    assert_eq!(updated.amount, dec("12.34"));

    let found = store
        .find_local(GatewayId::MercadoPago, RecordKind::Payment, "mp_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.customer_ref.as_deref(), Some("cus_9"));

    let counts = store
        .count_local_by_status(GatewayId::MercadoPago, RecordKind::Payment)
        .await
        .unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].status, "approved");
    assert_eq!(counts[0].count, 2);

    assert!(
        store
            .find_local(GatewayId::Asaas, RecordKind::Payment, "mp_1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_ledger_round_trips_money_and_is_idempotent() {
    let store = store().await;
    let writer = LedgerWriter::new(store.clone(), Arc::new(TierSchedule::default()));
    let at = Utc.with_ymd_and_hms(2024, 7, 4, 15, 0, 0).unwrap();
    let request = ChargeRequest {
        payment_ref: "1".into(),
        external_ref: "mp_1".into(),
        gateway: GatewayId::MercadoPago,
        gross_amount: dec("100.00"),
        currency: "BRL".into(),
        payment_method: Some(PaymentMethod::Pix),
        occurred_at: at,
    };

    let first = writer.post_charge(request.clone()).await.unwrap();
    assert!(first.created);
    assert_eq!(first.entry.fee_amount, dec("1.99"));
    assert_eq!(first.entry.net_amount, dec("98.01"));
    assert_eq!(first.entry.fee_percent, dec("1.99"));

    let again = writer.post_charge(request).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.entry.id, first.entry.id);

    let volume = store
        .charged_volume(at - Duration::days(1), at + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(volume, dec("100.00"));

    store
        .update_ledger_status(first.entry.id, EntryStatus::Refunded)
        .await
        .unwrap();
    let stored = store.find_ledger_by_key("charge:1").await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::Refunded);
    assert_eq!(stored.payment_method, Some(PaymentMethod::Pix));
}

#[tokio::test]
async fn test_local_records_window_and_kind() {
    let store = store().await;
    store.upsert_local(&fields("mp_1", "approved", "10.00")).await.unwrap();
    let mut customer = fields("cus_1", "active", "0");
    customer.kind = RecordKind::Customer;
    store.upsert_local(&customer).await.unwrap();

    let day = Utc.with_ymd_and_hms(2024, 7, 4, 0, 0, 0).unwrap();
    let payments = store
        .local_records(RecordKind::Payment, day, day + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].external_id, "mp_1");
    assert_eq!(payments[0].payment_method, Some(PaymentMethod::Pix));

    assert!(
        store
            .local_records(RecordKind::Payment, day + Duration::days(1), day + Duration::days(2))
            .await
            .unwrap()
            .is_empty()
    );
}
