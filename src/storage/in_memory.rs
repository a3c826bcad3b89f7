use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{LedgerInsert, LocalRecord, LocalRecordFields, StatusCount, SyncStore};
use crate::error::{GatesyncError, Result};
use crate::gateway::{GatewayId, RecordKind};
use crate::ledger::{EntryStatus, EntryType, LedgerEntry, NewLedgerEntry};

type RecordKey = (GatewayId, RecordKind, String);

#[derive(Default)]
struct Inner {
    records: HashMap<RecordKey, LocalRecord>,
    next_record_id: i64,
    // Keyed by id so iteration is insertion order.
    ledger: BTreeMap<i64, LedgerEntry>,
    ledger_keys: HashMap<String, i64>,
    next_ledger_id: i64,
}

/// In-memory store for tests and dry runs.
///
/// All state lives behind one lock, so the idempotent ledger insert is
/// atomic for concurrent callers in the same process.
#[derive(Clone, Default)]
pub struct InMemorySyncStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySyncStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| GatesyncError::internal("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| GatesyncError::internal("in-memory store lock poisoned"))
    }

    /// Number of local records across all gateways and kinds.
    pub fn record_count(&self) -> usize {
        self.inner.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    /// Number of ledger entries.
    pub fn ledger_count(&self) -> usize {
        self.inner.read().map(|inner| inner.ledger.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn find_local(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>> {
        let inner = self.read()?;
        Ok(inner
            .records
            .get(&(gateway, kind, external_id.to_string()))
            .cloned())
    }

    async fn upsert_local(&self, fields: &LocalRecordFields) -> Result<LocalRecord> {
        let mut inner = self.write()?;
        let now = Utc::now();
        let key = (fields.gateway, fields.kind, fields.external_id.clone());

        let existing = inner.records.get(&key).map(|r| (r.id, r.created_at));
        let record = match existing {
            Some((id, created_at)) => LocalRecord::from_fields(id, fields, created_at, now),
            None => {
                inner.next_record_id += 1;
                LocalRecord::from_fields(inner.next_record_id, fields, now, now)
            }
        };
        inner.records.insert(key, record.clone());
        Ok(record)
    }

    async fn count_local_by_status(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
    ) -> Result<Vec<StatusCount>> {
        let inner = self.read()?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in inner
            .records
            .values()
            .filter(|r| r.gateway == gateway && r.kind == kind)
        {
            *counts.entry(record.status.clone()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    async fn local_records(
        &self,
        kind: RecordKind,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LocalRecord>> {
        let inner = self.read()?;
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.kind == kind && r.occurred_at >= from && r.occurred_at < until)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.occurred_at, r.id));
        Ok(records)
    }

    async fn insert_ledger(&self, entry: &NewLedgerEntry) -> Result<LedgerInsert> {
        let mut inner = self.write()?;
        if let Some(id) = inner.ledger_keys.get(&entry.idempotency_key) {
            let existing = inner
                .ledger
                .get(id)
                .cloned()
                .ok_or_else(|| GatesyncError::internal("ledger key index out of sync"))?;
            return Ok(LedgerInsert::Existing(existing));
        }

        inner.next_ledger_id += 1;
        let id = inner.next_ledger_id;
        let stored = LedgerEntry::from_new(id, entry.clone(), Utc::now());
        inner.ledger_keys.insert(entry.idempotency_key.clone(), id);
        inner.ledger.insert(id, stored.clone());
        Ok(LedgerInsert::Inserted(stored))
    }

    async fn find_ledger_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        let inner = self.read()?;
        Ok(inner
            .ledger_keys
            .get(idempotency_key)
            .and_then(|id| inner.ledger.get(id))
            .cloned())
    }

    async fn ledger_for_payment(&self, payment_ref: &str) -> Result<Vec<LedgerEntry>> {
        let inner = self.read()?;
        Ok(inner
            .ledger
            .values()
            .filter(|e| e.payment_ref == payment_ref)
            .cloned()
            .collect())
    }

    async fn update_ledger_status(&self, id: i64, status: EntryStatus) -> Result<()> {
        let mut inner = self.write()?;
        let entry = inner
            .ledger
            .get_mut(&id)
            .ok_or_else(|| GatesyncError::not_found(format!("ledger entry {}", id)))?;
        entry.status = status;
        Ok(())
    }

    async fn charged_volume(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Decimal> {
        let inner = self.read()?;
        Ok(inner
            .ledger
            .values()
            .filter(|e| e.entry_type == EntryType::Charge)
            .filter(|e| e.occurred_at >= from && e.occurred_at < until)
            .map(|e| e.gross_amount)
            .sum())
    }

    async fn ledger_entries(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.read()?;
        let mut entries: Vec<_> = inner
            .ledger
            .values()
            .filter(|e| e.occurred_at >= from && e.occurred_at < until)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(entries)
    }
}
