//! SeaORM-backed sync storage.
//!
//! Amounts are stored as integer cents and fee rates as basis points, so
//! no floating point ever reaches the database.
//!
//! ```rust,ignore
//! use gatesync::storage::SeaOrmSyncStore;
//! use gatesync::storage::migration::{Migrator, run_migrations};
//!
//! let db = sea_orm::Database::connect(&database_url).await?;
//! run_migrations::<Migrator>(&db).await?;
//! let store = SeaOrmSyncStore::new(db);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TryInsertResult, sea_query::OnConflict,
};
use std::collections::BTreeMap;

use super::{LedgerInsert, LocalRecord, LocalRecordFields, StatusCount, SyncStore};
use crate::error::{GatesyncError, Result};
use crate::gateway::{GatewayId, PaymentMethod, RecordKind};
use crate::ledger::{EntryStatus, EntryType, LedgerEntry, NewLedgerEntry};
use crate::money::{from_basis_points, from_cents, to_basis_points, to_cents};

// =============================================================================
// SeaORM Entities
// =============================================================================

mod entity {
    pub mod gateway_record {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "gateway_records")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub gateway: String,
            pub kind: String,
            pub external_id: String,
            pub status: String,
            pub amount_cents: i64,
            pub currency: String,
            pub payment_method: Option<String>,
            pub customer_ref: Option<String>,
            pub occurred_at: DateTimeUtc,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod ledger_entry {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "ledger_entries")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub entry_type: String,
            pub payment_ref: String,
            pub external_ref: String,
            pub gateway: String,
            pub payment_method: Option<String>,
            pub currency: String,
            pub gross_cents: i64,
            pub fee_cents: i64,
            pub net_cents: i64,
            pub fee_bps: i32,
            pub tier_number: Option<i32>,
            pub status: String,
            #[sea_orm(unique)]
            pub idempotency_key: String,
            pub occurred_at: DateTimeUtc,
            pub created_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{gateway_record, ledger_entry};

// =============================================================================
// Conversion helpers
// =============================================================================

fn db_err(e: sea_orm::DbErr) -> GatesyncError {
    GatesyncError::Database(e.to_string())
}

fn corrupt(column: &str, value: &str) -> GatesyncError {
    GatesyncError::Database(format!("unreadable {} value '{}'", column, value))
}

fn cents(value: Decimal, column: &str) -> Result<i64> {
    to_cents(value).ok_or_else(|| corrupt(column, &value.to_string()))
}

fn model_to_local(model: gateway_record::Model) -> Result<LocalRecord> {
    Ok(LocalRecord {
        id: i64::from(model.id),
        gateway: model
            .gateway
            .parse()
            .map_err(|_| corrupt("gateway", &model.gateway))?,
        kind: model.kind.parse().map_err(|_| corrupt("kind", &model.kind))?,
        external_id: model.external_id,
        status: model.status,
        amount: from_cents(model.amount_cents),
        currency: model.currency,
        payment_method: model.payment_method.as_deref().map(PaymentMethod::from_label),
        customer_ref: model.customer_ref,
        occurred_at: model.occurred_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn model_to_entry(model: ledger_entry::Model) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: i64::from(model.id),
        entry_type: EntryType::parse(&model.entry_type)
            .ok_or_else(|| corrupt("entry_type", &model.entry_type))?,
        payment_ref: model.payment_ref,
        external_ref: model.external_ref,
        gateway: model
            .gateway
            .parse()
            .map_err(|_| corrupt("gateway", &model.gateway))?,
        payment_method: model.payment_method.as_deref().map(PaymentMethod::from_label),
        currency: model.currency,
        gross_amount: from_cents(model.gross_cents),
        fee_amount: from_cents(model.fee_cents),
        net_amount: from_cents(model.net_cents),
        fee_percent: from_basis_points(model.fee_bps),
        tier_number: model.tier_number.and_then(|t| u32::try_from(t).ok()),
        status: EntryStatus::parse(&model.status).ok_or_else(|| corrupt("status", &model.status))?,
        idempotency_key: model.idempotency_key,
        occurred_at: model.occurred_at,
        created_at: model.created_at,
    })
}

// =============================================================================
// Store
// =============================================================================

/// SeaORM implementation of [`SyncStore`].
#[derive(Clone)]
pub struct SeaOrmSyncStore {
    db: DatabaseConnection,
}

impl SeaOrmSyncStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connect to `url` without running migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = sea_orm::Database::connect(url)
            .await
            .map_err(|e| GatesyncError::database(format!("Failed to connect: {}", e)))?;
        Ok(Self::new(db))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl SyncStore for SeaOrmSyncStore {
    async fn find_local(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<LocalRecord>> {
        gateway_record::Entity::find()
            .filter(gateway_record::Column::Gateway.eq(gateway.as_str()))
            .filter(gateway_record::Column::Kind.eq(kind.as_str()))
            .filter(gateway_record::Column::ExternalId.eq(external_id))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(model_to_local)
            .transpose()
    }

    async fn upsert_local(&self, fields: &LocalRecordFields) -> Result<LocalRecord> {
        tracing::debug!(
            target: "gatesync::sync",
            gateway = %fields.gateway,
            kind = %fields.kind,
            external_id = %fields.external_id,
            "Upserting local record"
        );

        let now = Utc::now();
        let model = gateway_record::ActiveModel {
            gateway: Set(fields.gateway.as_str().to_string()),
            kind: Set(fields.kind.as_str().to_string()),
            external_id: Set(fields.external_id.clone()),
            status: Set(fields.status.clone()),
            amount_cents: Set(cents(fields.amount, "amount")?),
            currency: Set(fields.currency.clone()),
            payment_method: Set(fields.payment_method.map(|m| m.as_str().to_string())),
            customer_ref: Set(fields.customer_ref.clone()),
            occurred_at: Set(fields.occurred_at),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        gateway_record::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    gateway_record::Column::Gateway,
                    gateway_record::Column::Kind,
                    gateway_record::Column::ExternalId,
                ])
                .update_columns([
                    gateway_record::Column::Status,
                    gateway_record::Column::AmountCents,
                    gateway_record::Column::Currency,
                    gateway_record::Column::PaymentMethod,
                    gateway_record::Column::CustomerRef,
                    gateway_record::Column::OccurredAt,
                    gateway_record::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        self.find_local(fields.gateway, fields.kind, &fields.external_id)
            .await?
            .ok_or_else(|| GatesyncError::database("upserted record not found"))
    }

    async fn count_local_by_status(
        &self,
        gateway: GatewayId,
        kind: RecordKind,
    ) -> Result<Vec<StatusCount>> {
        let statuses: Vec<String> = gateway_record::Entity::find()
            .select_only()
            .column(gateway_record::Column::Status)
            .filter(gateway_record::Column::Gateway.eq(gateway.as_str()))
            .filter(gateway_record::Column::Kind.eq(kind.as_str()))
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(db_err)?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for status in statuses {
            *counts.entry(status).or_default() += 1;
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
        gateway_record::Entity::find()
            .filter(gateway_record::Column::Kind.eq(kind.as_str()))
            .filter(gateway_record::Column::OccurredAt.gte(from))
            .filter(gateway_record::Column::OccurredAt.lt(until))
            .order_by_asc(gateway_record::Column::OccurredAt)
            .order_by_asc(gateway_record::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(model_to_local)
            .collect()
    }

    async fn insert_ledger(&self, entry: &NewLedgerEntry) -> Result<LedgerInsert> {
        tracing::debug!(
            target: "gatesync::ledger",
            key = %entry.idempotency_key,
            entry_type = %entry.entry_type,
            "Inserting ledger entry"
        );

        let fee_bps = to_basis_points(entry.fee_percent)
            .ok_or_else(|| corrupt("fee_percent", &entry.fee_percent.to_string()))?;
        let tier_number = entry
            .tier_number
            .map(|t| i32::try_from(t).map_err(|_| corrupt("tier_number", &t.to_string())))
            .transpose()?;

        let model = ledger_entry::ActiveModel {
            entry_type: Set(entry.entry_type.as_str().to_string()),
            payment_ref: Set(entry.payment_ref.clone()),
            external_ref: Set(entry.external_ref.clone()),
            gateway: Set(entry.gateway.as_str().to_string()),
            payment_method: Set(entry.payment_method.map(|m| m.as_str().to_string())),
            currency: Set(entry.currency.clone()),
            gross_cents: Set(cents(entry.gross_amount, "gross_amount")?),
            fee_cents: Set(cents(entry.fee_amount, "fee_amount")?),
            net_cents: Set(cents(entry.net_amount, "net_amount")?),
            fee_bps: Set(fee_bps),
            tier_number: Set(tier_number),
            status: Set(entry.status.as_str().to_string()),
            idempotency_key: Set(entry.idempotency_key.clone()),
            occurred_at: Set(entry.occurred_at),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        // Conflict on the key is a no-op; the unique index makes this atomic.
        let outcome = ledger_entry::Entity::insert(model)
            .on_conflict(
                OnConflict::column(ledger_entry::Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        let inserted = matches!(outcome, TryInsertResult::Inserted(_));

        let stored = self
            .find_ledger_by_key(&entry.idempotency_key)
            .await?
            .ok_or_else(|| GatesyncError::database("ledger entry missing after insert"))?;

        Ok(if inserted {
            LedgerInsert::Inserted(stored)
        } else {
            LedgerInsert::Existing(stored)
        })
    }

    async fn find_ledger_by_key(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        ledger_entry::Entity::find()
            .filter(ledger_entry::Column::IdempotencyKey.eq(idempotency_key))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(model_to_entry)
            .transpose()
    }

    async fn ledger_for_payment(&self, payment_ref: &str) -> Result<Vec<LedgerEntry>> {
        ledger_entry::Entity::find()
            .filter(ledger_entry::Column::PaymentRef.eq(payment_ref))
            .order_by_asc(ledger_entry::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(model_to_entry)
            .collect()
    }

    async fn update_ledger_status(&self, id: i64, status: EntryStatus) -> Result<()> {
        let id = i32::try_from(id).map_err(|_| GatesyncError::not_found(format!("ledger entry {}", id)))?;
        let result = ledger_entry::Entity::update_many()
            .col_expr(
                ledger_entry::Column::Status,
                sea_orm::sea_query::Expr::value(status.as_str()),
            )
            .filter(ledger_entry::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        if result.rows_affected == 0 {
            return Err(GatesyncError::not_found(format!("ledger entry {}", id)));
        }
        Ok(())
    }

    async fn charged_volume(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Decimal> {
        // Summed in Rust: SUM(bigint) decodes as NUMERIC on Postgres.
        let gross: Vec<i64> = ledger_entry::Entity::find()
            .select_only()
            .column(ledger_entry::Column::GrossCents)
            .filter(ledger_entry::Column::EntryType.eq(EntryType::Charge.as_str()))
            .filter(ledger_entry::Column::OccurredAt.gte(from))
            .filter(ledger_entry::Column::OccurredAt.lt(until))
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(from_cents(gross.iter().sum()))
    }

    async fn ledger_entries(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>> {
        ledger_entry::Entity::find()
            .filter(ledger_entry::Column::OccurredAt.gte(from))
            .filter(ledger_entry::Column::OccurredAt.lt(until))
            .order_by_asc(ledger_entry::Column::OccurredAt)
            .order_by_asc(ledger_entry::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(model_to_entry)
            .collect()
    }
}
