//! Read-only rollups over the ledger and local records.
//!
//! Each ledger entry lands in exactly one group, so group totals always add
//! up to the window total. Empty windows give empty rollups, not errors.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{GatesyncError, Result};
use crate::fees::{TierProgress, TierSchedule, month_start};
use crate::gateway::{GatewayId, RecordKind};
use crate::ledger::{EntryType, LedgerEntry};
use crate::storage::{LocalRecord, StatusCount, SyncStore};
use crate::window::SyncWindow;

/// Rollup dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Day,
    Gateway,
    Tier,
    PaymentMethod,
    EntryType,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Gateway => "gateway",
            Self::Tier => "tier",
            Self::PaymentMethod => "payment_method",
            Self::EntryType => "entry_type",
        }
    }

    fn key(&self, entry: &LedgerEntry) -> String {
        match self {
            Self::Day => entry.occurred_at.date_naive().to_string(),
            Self::Gateway => entry.gateway.to_string(),
            Self::Tier => entry
                .tier_number
                .map(|n| format!("tier_{}", n))
                .unwrap_or_else(|| "untiered".to_string()),
            Self::PaymentMethod => entry
                .payment_method
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            Self::EntryType => entry.entry_type.to_string(),
        }
    }
}

impl std::str::FromStr for GroupBy {
    type Err = GatesyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "day" | "daily" => Ok(Self::Day),
            "gateway" => Ok(Self::Gateway),
            "tier" => Ok(Self::Tier),
            "payment_method" | "method" => Ok(Self::PaymentMethod),
            "entry_type" | "type" => Ok(Self::EntryType),
            other => Err(GatesyncError::bad_request(format!(
                "unknown grouping: {}",
                other
            ))),
        }
    }
}

/// Totals for one group.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LedgerRollup {
    pub key: String,
    pub entries: u64,
    pub gross: Decimal,
    pub fee: Decimal,
    pub net: Decimal,
}

impl LedgerRollup {
    fn add(&mut self, entry: &LedgerEntry) {
        self.entries += 1;
        self.gross += entry.gross_amount;
        self.fee += entry.fee_amount;
        self.net += entry.net_amount;
    }
}

/// Group entries by `group_by`, ordered by key.
pub fn rollup(entries: &[LedgerEntry], group_by: GroupBy) -> Vec<LedgerRollup> {
    let mut groups: BTreeMap<String, LedgerRollup> = BTreeMap::new();
    for entry in entries {
        let key = group_by.key(entry);
        groups
            .entry(key.clone())
            .or_insert_with(|| LedgerRollup {
                key,
                ..LedgerRollup::default()
            })
            .add(entry);
    }
    groups.into_values().collect()
}

/// Rollup dimension for local records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordGroupBy {
    Day,
    Gateway,
    PaymentMethod,
    Status,
}

impl RecordGroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Gateway => "gateway",
            Self::PaymentMethod => "payment_method",
            Self::Status => "status",
        }
    }

    fn key(&self, record: &LocalRecord) -> String {
        match self {
            Self::Day => record.occurred_at.date_naive().to_string(),
            Self::Gateway => record.gateway.to_string(),
            Self::PaymentMethod => record
                .payment_method
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            Self::Status => record.status.clone(),
        }
    }
}

impl std::str::FromStr for RecordGroupBy {
    type Err = GatesyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "day" | "daily" => Ok(Self::Day),
            "gateway" => Ok(Self::Gateway),
            "payment_method" | "method" => Ok(Self::PaymentMethod),
            "status" => Ok(Self::Status),
            other => Err(GatesyncError::bad_request(format!(
                "unknown record grouping: {}",
                other
            ))),
        }
    }
}

/// Count and amount of local records in one group.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RecordRollup {
    pub key: String,
    pub records: u64,
    pub amount: Decimal,
}

/// Group local records by `group_by`, ordered by key.
pub fn rollup_records(records: &[LocalRecord], group_by: RecordGroupBy) -> Vec<RecordRollup> {
    let mut groups: BTreeMap<String, RecordRollup> = BTreeMap::new();
    for record in records {
        let key = group_by.key(record);
        let group = groups.entry(key.clone()).or_insert_with(|| RecordRollup {
            key,
            ..RecordRollup::default()
        });
        group.records += 1;
        group.amount += record.amount;
    }
    groups.into_values().collect()
}

/// Window totals, split by entry type.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub window: SyncWindow,
    pub entries: u64,
    pub charges: u64,
    pub refunds: u64,
    pub fees: u64,
    pub settlements: u64,
    pub adjustments: u64,
    pub charged_gross: Decimal,
    pub refunded_gross: Decimal,
    pub gross: Decimal,
    pub fee: Decimal,
    pub net: Decimal,
}

impl LedgerSummary {
    pub fn from_entries(window: SyncWindow, entries: &[LedgerEntry]) -> Self {
        let mut summary = Self {
            window,
            entries: 0,
            charges: 0,
            refunds: 0,
            fees: 0,
            settlements: 0,
            adjustments: 0,
            charged_gross: Decimal::ZERO,
            refunded_gross: Decimal::ZERO,
            gross: Decimal::ZERO,
            fee: Decimal::ZERO,
            net: Decimal::ZERO,
        };
        for entry in entries {
            summary.entries += 1;
            summary.gross += entry.gross_amount;
            summary.fee += entry.fee_amount;
            summary.net += entry.net_amount;
            match entry.entry_type {
                EntryType::Charge => {
                    summary.charges += 1;
                    summary.charged_gross += entry.gross_amount;
                }
                EntryType::Refund => {
                    summary.refunds += 1;
                    summary.refunded_gross -= entry.gross_amount;
                }
                EntryType::Fee => summary.fees += 1,
                EntryType::Settlement => summary.settlements += 1,
                EntryType::Adjustment => summary.adjustments += 1,
            }
        }
        summary
    }
}

/// Dashboard queries over a [`SyncStore`].
#[derive(Clone)]
pub struct ReportingAggregator<S> {
    store: S,
    schedule: Arc<TierSchedule>,
}

impl<S: SyncStore> ReportingAggregator<S> {
    pub fn new(store: S, schedule: Arc<TierSchedule>) -> Self {
        Self { store, schedule }
    }

    pub async fn rollup(&self, group_by: GroupBy, window: &SyncWindow) -> Result<Vec<LedgerRollup>> {
        self.store
            .aggregate_ledger(group_by, window.start_instant(), window.end_instant())
            .await
    }

    /// Local subscriptions, payments or customers in `window`, grouped.
    pub async fn record_rollup(
        &self,
        kind: RecordKind,
        group_by: RecordGroupBy,
        window: &SyncWindow,
    ) -> Result<Vec<RecordRollup>> {
        let records = self
            .store
            .local_records(kind, window.start_instant(), window.end_instant())
            .await?;
        Ok(rollup_records(&records, group_by))
    }

    pub async fn summary(&self, window: &SyncWindow) -> Result<LedgerSummary> {
        let entries = self.entries(window).await?;
        Ok(LedgerSummary::from_entries(*window, &entries))
    }

    /// Tier standing for the month containing `as_of`, counting charges
    /// before `as_of`.
    pub async fn tier_progress(&self, as_of: DateTime<Utc>) -> Result<TierProgress> {
        let gmv = self.store.charged_volume(month_start(as_of), as_of).await?;
        Ok(self.schedule.progress(gmv))
    }

    /// Local rows of one kind, counted by gateway status.
    pub async fn record_counts(&self, gateway: GatewayId, kind: RecordKind) -> Result<Vec<StatusCount>> {
        self.store.count_local_by_status(gateway, kind).await
    }

    async fn entries(&self, window: &SyncWindow) -> Result<Vec<LedgerEntry>> {
        self.store
            .ledger_entries(window.start_instant(), window.end_instant())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PaymentMethod;
    use crate::ledger::{ChargeRequest, LedgerWriter, RefundRequest, SettlementRequest};
    use crate::storage::LocalRecordFields;
    use crate::storage::InMemorySyncStore;
    use chrono::{NaiveDate, TimeZone};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn march() -> SyncWindow {
        SyncWindow::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
    }

    async fn seeded() -> ReportingAggregator<InMemorySyncStore> {
        let store = InMemorySyncStore::new();
        let schedule = Arc::new(TierSchedule::default());
        let writer = LedgerWriter::new(store.clone(), schedule.clone());
        let charges = [
            ("1", GatewayId::Asaas, PaymentMethod::Pix, "100.00", 1),
            ("2", GatewayId::Asaas, PaymentMethod::Boleto, "50.00", 1),
            ("3", GatewayId::Pagarme, PaymentMethod::CreditCard, "200.00", 2),
        ];
        for (id, gateway, method, gross, day) in charges {
            writer
                .post_charge(ChargeRequest {
                    payment_ref: id.into(),
                    external_ref: format!("ext_{}", id),
                    gateway,
                    gross_amount: dec(gross),
                    currency: "BRL".into(),
                    payment_method: Some(method),
                    occurred_at: Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap(),
                })
                .await
                .unwrap();
        }
        writer
            .post_refund(RefundRequest {
                payment_ref: "2".into(),
                refund_ref: "r1".into(),
                amount: None,
                occurred_at: Utc.with_ymd_and_hms(2024, 3, 3, 10, 0, 0).unwrap(),
            })
            .await
            .unwrap();
        writer
            .post_settlement(SettlementRequest {
                settlement_ref: "po_1".into(),
                gateway: GatewayId::Asaas,
                currency: "BRL".into(),
                gross_amount: dec("100.00"),
                fee_amount: dec("0.99"),
                occurred_at: Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
            })
            .await
            .unwrap();

        let records = [
            ("pay_1", GatewayId::Asaas, Some(PaymentMethod::Pix), "paid", "100.00", 1),
            ("pay_2", GatewayId::Asaas, Some(PaymentMethod::Boleto), "refunded", "50.00", 1),
            ("or_3", GatewayId::Pagarme, Some(PaymentMethod::CreditCard), "paid", "200.00", 2),
            ("or_4", GatewayId::Pagarme, None, "pending", "10.00", 2),
        ];
        for (external_id, gateway, payment_method, status, amount, day) in records {
            store
                .upsert_local(&LocalRecordFields {
                    gateway,
                    kind: RecordKind::Payment,
                    external_id: external_id.into(),
                    status: status.into(),
                    amount: dec(amount),
                    currency: "BRL".into(),
                    payment_method,
                    customer_ref: None,
                    occurred_at: Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap(),
                })
                .await
                .unwrap();
        }
        ReportingAggregator::new(store, schedule)
    }

    #[tokio::test]
    async fn test_groups_partition_the_window() {
        let reports = seeded().await;
        let summary = reports.summary(&march()).await.unwrap();
        assert_eq!(summary.entries, 5);
        assert_eq!(summary.charges, 3);
        assert_eq!(summary.refunds, 1);
        assert_eq!(summary.settlements, 1);
        assert_eq!(summary.charged_gross, dec("350.00"));
        assert_eq!(summary.refunded_gross, dec("50.00"));

        for group_by in [
            GroupBy::Day,
            GroupBy::Gateway,
            GroupBy::Tier,
            GroupBy::PaymentMethod,
            GroupBy::EntryType,
        ] {
            let groups = reports.rollup(group_by, &march()).await.unwrap();
            let entries: u64 = groups.iter().map(|g| g.entries).sum();
            let net: Decimal = groups.iter().map(|g| g.net).sum();
            assert_eq!(entries, summary.entries, "{:?}", group_by);
            assert_eq!(net, summary.net, "{:?}", group_by);
        }
    }

    #[tokio::test]
    async fn test_gateway_rollup() {
        let reports = seeded().await;
        let groups = reports.rollup(GroupBy::Gateway, &march()).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "asaas");
        assert_eq!(groups[0].entries, 4);
        assert_eq!(groups[0].gross, dec("200.00"));
        assert_eq!(groups[1].key, "pagarme");
    }

    #[tokio::test]
    async fn test_record_rollups() {
        let reports = seeded().await;

        let by_gateway = reports
            .record_rollup(RecordKind::Payment, RecordGroupBy::Gateway, &march())
            .await
            .unwrap();
        assert_eq!(by_gateway.len(), 2);
        assert_eq!(by_gateway[0].key, "asaas");
        assert_eq!(by_gateway[0].records, 2);
        assert_eq!(by_gateway[0].amount, dec("150.00"));
        assert_eq!(by_gateway[1].amount, dec("210.00"));

        let by_day = reports
            .record_rollup(RecordKind::Payment, RecordGroupBy::Day, &march())
            .await
            .unwrap();
        let keys: Vec<_> = by_day.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-03-01", "2024-03-02"]);

        let by_method = reports
            .record_rollup(RecordKind::Payment, RecordGroupBy::PaymentMethod, &march())
            .await
            .unwrap();
        let total: u64 = by_method.iter().map(|r| r.records).sum();
        assert_eq!(total, 4);
        assert!(by_method.iter().any(|r| r.key == "unknown" && r.records == 1));
    }

    #[tokio::test]
    async fn test_empty_window_is_empty() {
        let reports = seeded().await;
        let february = SyncWindow::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        );
        assert!(reports.rollup(GroupBy::Day, &february).await.unwrap().is_empty());
        for group_by in [
            RecordGroupBy::Day,
            RecordGroupBy::Gateway,
            RecordGroupBy::PaymentMethod,
            RecordGroupBy::Status,
        ] {
            assert!(
                reports
                    .record_rollup(RecordKind::Payment, group_by, &february)
                    .await
                    .unwrap()
                    .is_empty()
            );
        }
        assert!(
            reports
                .record_rollup(RecordKind::Subscription, RecordGroupBy::Gateway, &march())
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(reports.summary(&february).await.unwrap().entries, 0);
        assert!(
            reports
                .record_counts(GatewayId::Asaas, RecordKind::Subscription)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_tier_progress_counts_month_to_date() {
        let reports = seeded().await;
        let progress = reports
            .tier_progress(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(progress.gmv, dec("350.00"));
        assert_eq!(progress.current.tier_number, 1);
        assert_eq!(progress.remaining_to_next, Some(dec("9650.00")));
    }

    #[test]
    fn test_group_by_parsing() {
        assert_eq!(GroupBy::from_str("payment-method").unwrap(), GroupBy::PaymentMethod);
        assert_eq!(GroupBy::from_str("DAY").unwrap(), GroupBy::Day);
        assert!(GroupBy::from_str("week").is_err());
        assert_eq!(RecordGroupBy::from_str("Status").unwrap(), RecordGroupBy::Status);
        assert!(RecordGroupBy::from_str("tier").is_err());
    }
}
