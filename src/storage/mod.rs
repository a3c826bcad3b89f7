//! Persistence for synced records and the ledger.
//!
//! [`SyncStore`] is the only seam between the engine and a database.
//! [`InMemorySyncStore`] backs tests and dry runs; with the `database`
//! feature, [`SeaOrmSyncStore`] persists to Postgres or SQLite.

mod in_memory;
#[cfg(feature = "database")]
pub mod migration;
#[cfg(feature = "database")]
mod sea_orm_store;

pub use in_memory::InMemorySyncStore;
#[cfg(feature = "database")]
pub use sea_orm_store::SeaOrmSyncStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::gateway::{GatewayId, PaymentMethod, RecordKind, RecordTransformError, RemoteRecord};
use crate::ledger::{EntryStatus, LedgerEntry, NewLedgerEntry};
use crate::money::to_cents;
use crate::reporting::{GroupBy, LedgerRollup, rollup};

/// Trait for storing synced records and ledger entries.
///
/// Implementations must make [`insert_ledger`](SyncStore::insert_ledger)
/// atomic on the idempotency key: two concurrent inserts with the same key
/// yield exactly one row.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // Local records

    /// Look up the local copy of a gateway object.
    async fn find_local(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>>;

    /// Insert or update the local copy keyed on `(gateway, kind, external_id)`.
    async fn upsert_local(&self, fields: &LocalRecordFields) -> Result<LocalRecord>;

    /// Count local records of one kind by gateway status.
    async fn count_local_by_status(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
    ) -> Result<Vec<StatusCount>>;

    /// Local records of one kind with `from <= occurred_at < until`, oldest first.
    async fn local_records(
        &self,
        kind: RecordKind,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LocalRecord>>;

    // Ledger

    /// Insert unless an entry with the same idempotency key already exists.
    async fn insert_ledger(&self, entry: &NewLedgerEntry) -> Result<LedgerInsert>;

    async fn find_ledger_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>>;

    /// All entries for a local payment, oldest first.
    async fn ledger_for_payment(&self, payment_ref: &str) -> Result<Vec<LedgerEntry>>;

    async fn update_ledger_status(&self, id: i64, status: EntryStatus) -> Result<()>;

    /// Gross of charge entries with `from <= occurred_at < until`.
    async fn charged_volume(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Decimal>;

    /// Entries with `from <= occurred_at < until`, oldest first.
    async fn ledger_entries(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Ledger totals per group for `from <= occurred_at < until`, ordered by
    /// key. Each entry lands in exactly one group.
    ///
    /// The default groups [`ledger_entries`](SyncStore::ledger_entries) in
    /// process, which keeps day boundaries in UTC on every backend.
    async fn aggregate_ledger(
        &self,
        group_by: GroupBy,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LedgerRollup>> {
        let entries = self.ledger_entries(from, until).await?;
        Ok(rollup(&entries, group_by))
    }
}

/// Lets callers pick a backend at runtime and share it as `Arc<dyn SyncStore>`.
#[async_trait]
impl<T: SyncStore + ?Sized> SyncStore for Arc<T> {
    async fn find_local(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>> {
        (**self).find_local(gateway, kind, external_id).await
    }

    async fn upsert_local(&self, fields: &LocalRecordFields) -> Result<LocalRecord> {
        (**self).upsert_local(fields).await
    }

    async fn count_local_by_status(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
    ) -> Result<Vec<StatusCount>> {
        (**self).count_local_by_status(gateway, kind).await
    }

    async fn local_records(
        &self,
        kind: RecordKind,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LocalRecord>> {
        (**self).local_records(kind, from, until).await
    }

    async fn insert_ledger(&self, entry: &NewLedgerEntry) -> Result<LedgerInsert> {
        (**self).insert_ledger(entry).await
    }

    async fn find_ledger_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        (**self).find_ledger_by_key(idempotency_key).await
    }

    async fn ledger_for_payment(&self, payment_ref: &str) -> Result<Vec<LedgerEntry>> {
        (**self).ledger_for_payment(payment_ref).await
    }

    async fn update_ledger_status(&self, id: i64, status: EntryStatus) -> Result<()> {
        (**self).update_ledger_status(id, status).await
    }

    async fn charged_volume(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Decimal> {
        (**self).charged_volume(from, until).await
    }

    async fn ledger_entries(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>> {
        (**self).ledger_entries(from, until).await
    }

    async fn aggregate_ledger(
        &self,
        group_by: GroupBy,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LedgerRollup>> {
        (**self).aggregate_ledger(group_by, from, until).await
    }
}

/// Fields the engine writes to a local record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalRecordFields {
    pub gateway: GatewayId,
    pub kind: RecordKind,
    pub external_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
    pub customer_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LocalRecordFields {
    /// Validate a normalized gateway record before it touches storage.
    pub fn from_remote(
        gateway: GatewayId,
        record: &RemoteRecord,
    ) -> std::result::Result<Self, RecordTransformError> {
        let fail = |msg: &str| RecordTransformError::new(Some(record.external_id.clone()), msg);

        if record.external_id.trim().is_empty() {
            return Err(RecordTransformError::new(None, "empty external id"));
        }
        if record.amount < Decimal::ZERO {
            return Err(fail("negative amount"));
        }
        if to_cents(record.amount).is_none() {
            return Err(fail("amount out of range"));
        }
        let currency = record.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(fail("currency must be a three-letter code"));
        }

        Ok(Self {
            gateway,
            kind: record.kind(),
            external_id: record.external_id.clone(),
            status: record.status.clone(),
            amount: record.amount,
            currency,
            payment_method: record.payment_method(),
            customer_ref: record.customer_ref().map(str::to_string),
            occurred_at: record.occurred_at,
        })
    }
}

/// A stored local record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: i64,
    pub gateway: GatewayId,
    pub kind: RecordKind,
    pub external_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
    pub customer_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    pub fn from_fields(
        id: i64,
        fields: &LocalRecordFields,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            gateway: fields.gateway,
            kind: fields.kind,
            external_id: fields.external_id.clone(),
            status: fields.status.clone(),
            amount: fields.amount,
            currency: fields.currency.clone(),
            payment_method: fields.payment_method,
            customer_ref: fields.customer_ref.clone(),
            occurred_at: fields.occurred_at,
            created_at,
            updated_at,
        }
    }
}

/// Outcome of an idempotent ledger insert.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerInsert {
    Inserted(LedgerEntry),
    /// The key was taken; this is the entry that holds it.
    Existing(LedgerEntry),
}

impl LedgerInsert {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Inserted(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Self::Inserted(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}
