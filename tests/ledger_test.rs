//! Ledger behaviour across many postings: tier pricing and idempotency.

use chrono::{DateTime, Duration, TimeZone, Utc};
use gatesync::ledger::{ChargeRequest, RefundRequest};
use gatesync::{
    EntryStatus, GatewayId, InMemorySyncStore, LedgerWriter, PaymentMethod, SyncStore,
    TierSchedule,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn charge(id: &str, gross: &str, occurred_at: DateTime<Utc>) -> ChargeRequest {
    ChargeRequest {
        payment_ref: id.to_string(),
        external_ref: format!("ext_{}", id),
        gateway: GatewayId::Asaas,
        gross_amount: dec(gross),
        currency: "BRL".to_string(),
        payment_method: Some(PaymentMethod::CreditCard),
        occurred_at,
    }
}

fn writer() -> (LedgerWriter<InMemorySyncStore>, InMemorySyncStore) {
    let store = InMemorySyncStore::new();
    (
        LedgerWriter::new(store.clone(), Arc::new(TierSchedule::default())),
        store,
    )
}

#[tokio::test]
async fn test_rate_never_rises_within_a_month() {
    let (writer, _) = writer();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

    let mut last_rate = Decimal::MAX;
    let mut last_tier = 0;
    for i in 0..60 {
        let posting = writer
            .post_charge(charge(
                &i.to_string(),
                "4000.00",
                start + Duration::hours(i * 6),
            ))
            .await
            .unwrap();
        let tier = posting.entry.tier_number.unwrap();
        assert!(posting.entry.fee_percent <= last_rate, "charge {}", i);
        assert!(tier >= last_tier, "charge {}", i);
        last_rate = posting.entry.fee_percent;
        last_tier = tier;
    }

    // 240k of volume walks through every band of the default schedule.
    assert_eq!(last_tier, 4);
    assert_eq!(last_rate, dec("0.69"));
}

#[tokio::test]
async fn test_new_month_starts_over_at_tier_one() {
    let (writer, _) = writer();
    writer
        .post_charge(charge("big", "60000.00", Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap()))
        .await
        .unwrap();

    let late_may = writer
        .post_charge(charge("may", "10.00", Utc.with_ymd_and_hms(2024, 5, 31, 23, 0, 0).unwrap()))
        .await
        .unwrap();
    assert_eq!(late_may.entry.tier_number, Some(3));

    let june = writer
        .post_charge(charge("june", "10.00", Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()))
        .await
        .unwrap();
    assert_eq!(june.entry.tier_number, Some(1));
    assert_eq!(june.entry.fee_amount, dec("0.20"));
}

#[tokio::test]
async fn test_concurrent_postings_of_one_charge_insert_once() {
    let (writer, store) = writer();
    let at = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let writer = writer.clone();
            tokio::spawn(async move { writer.post_charge(charge("42", "100.00", at)).await })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let posting = handle.await.unwrap().unwrap();
        if posting.created {
            created += 1;
        }
        ids.push(posting.entry.id);
    }

    assert_eq!(created, 1);
    assert_eq!(store.ledger_count(), 1);
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_partial_refunds_then_replay() {
    let (writer, store) = writer();
    let at = Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap();
    writer.post_charge(charge("7", "300.00", at)).await.unwrap();

    for (refund_ref, amount) in [("r1", "100.00"), ("r2", "100.00")] {
        let posting = writer
            .post_refund(RefundRequest {
                payment_ref: "7".into(),
                refund_ref: refund_ref.into(),
                amount: Some(dec(amount)),
                occurred_at: at + Duration::days(1),
            })
            .await
            .unwrap();
        assert_eq!(posting.entry.fee_amount, dec("1.99"));
    }

    // Replaying r1 is a no-op, even with a different amount.
    let replay = writer
        .post_refund(RefundRequest {
            payment_ref: "7".into(),
            refund_ref: "r1".into(),
            amount: Some(dec("5.00")),
            occurred_at: at + Duration::days(2),
        })
        .await
        .unwrap();
    assert!(!replay.created);
    assert_eq!(replay.entry.gross_amount, dec("-100.00"));

    let last = writer
        .post_refund(RefundRequest {
            payment_ref: "7".into(),
            refund_ref: "r3".into(),
            amount: None,
            occurred_at: at + Duration::days(3),
        })
        .await
        .unwrap();
    assert_eq!(last.entry.gross_amount, dec("-100.00"));
    assert_eq!(last.entry.fee_amount, dec("1.99"));

    let entries = store.ledger_for_payment("7").await.unwrap();
    assert_eq!(entries.len(), 4);
    let net: Decimal = entries.iter().map(|e| e.net_amount).sum();
    assert_eq!(net, Decimal::ZERO);
    let charge = entries
        .iter()
        .find(|e| e.idempotency_key == "charge:7")
        .unwrap();
    assert_eq!(charge.status, EntryStatus::Refunded);
}
