//! Schema for the SeaORM store.
//!
//! ```rust,ignore
//! use gatesync::storage::migration::{Migrator, run_migrations};
//!
//! run_migrations::<Migrator>(&db).await?;
//! ```

use sea_orm_migration::prelude::*;

use crate::error::{GatesyncError, Result};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_gateway_records::Migration),
            Box::new(m20240101_000002_create_ledger_entries::Migration),
        ]
    }
}

/// Run pending migrations.
pub async fn run_migrations<M: MigratorTrait>(db: &sea_orm::DatabaseConnection) -> Result<()> {
    M::up(db, None)
        .await
        .map_err(|e| GatesyncError::internal(format!("Migration failed: {}", e)))?;

    tracing::info!(target: "gatesync::ledger", "Database migrations completed successfully");
    Ok(())
}

/// Roll back the last `steps` migrations (default one).
pub async fn rollback_migration<M: MigratorTrait>(
    db: &sea_orm::DatabaseConnection,
    steps: Option<u32>,
) -> Result<()> {
    M::down(db, steps)
        .await
        .map_err(|e| GatesyncError::internal(format!("Rollback failed: {}", e)))?;

    tracing::info!(target: "gatesync::ledger", "Rolled back {} migration(s)", steps.unwrap_or(1));
    Ok(())
}

#[derive(DeriveIden)]
enum GatewayRecords {
    Table,
    Id,
    Gateway,
    Kind,
    ExternalId,
    Status,
    AmountCents,
    Currency,
    PaymentMethod,
    CustomerRef,
    OccurredAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LedgerEntries {
    Table,
    Id,
    EntryType,
    PaymentRef,
    ExternalRef,
    Gateway,
    PaymentMethod,
    Currency,
    GrossCents,
    FeeCents,
    NetCents,
    FeeBps,
    TierNumber,
    Status,
    IdempotencyKey,
    OccurredAt,
    CreatedAt,
}

mod m20240101_000001_create_gateway_records {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_gateway_records"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> std::result::Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(GatewayRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(GatewayRecords::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(GatewayRecords::Gateway).string_len(32).not_null())
                        .col(ColumnDef::new(GatewayRecords::Kind).string_len(16).not_null())
                        .col(ColumnDef::new(GatewayRecords::ExternalId).string_len(128).not_null())
                        .col(ColumnDef::new(GatewayRecords::Status).string_len(64).not_null())
                        .col(ColumnDef::new(GatewayRecords::AmountCents).big_integer().not_null())
                        .col(ColumnDef::new(GatewayRecords::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(GatewayRecords::PaymentMethod).string_len(16).null())
                        .col(ColumnDef::new(GatewayRecords::CustomerRef).string_len(128).null())
                        .col(
                            ColumnDef::new(GatewayRecords::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GatewayRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GatewayRecords::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Upsert target: one local row per gateway object.
            manager
                .create_index(
                    Index::create()
                        .name("idx_gateway_records_external")
                        .table(GatewayRecords::Table)
                        .col(GatewayRecords::Gateway)
                        .col(GatewayRecords::Kind)
                        .col(GatewayRecords::ExternalId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> std::result::Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(GatewayRecords::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000002_create_ledger_entries {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_ledger_entries"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> std::result::Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LedgerEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LedgerEntries::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(LedgerEntries::EntryType).string_len(16).not_null())
                        .col(ColumnDef::new(LedgerEntries::PaymentRef).string_len(64).not_null())
                        .col(ColumnDef::new(LedgerEntries::ExternalRef).string_len(128).not_null())
                        .col(ColumnDef::new(LedgerEntries::Gateway).string_len(32).not_null())
                        .col(ColumnDef::new(LedgerEntries::PaymentMethod).string_len(16).null())
                        .col(ColumnDef::new(LedgerEntries::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(LedgerEntries::GrossCents).big_integer().not_null())
                        .col(ColumnDef::new(LedgerEntries::FeeCents).big_integer().not_null())
                        .col(ColumnDef::new(LedgerEntries::NetCents).big_integer().not_null())
                        .col(ColumnDef::new(LedgerEntries::FeeBps).integer().not_null())
                        .col(ColumnDef::new(LedgerEntries::TierNumber).integer().null())
                        .col(ColumnDef::new(LedgerEntries::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(LedgerEntries::IdempotencyKey)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LedgerEntries::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LedgerEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // The database, not the application, guarantees one entry per event.
            manager
                .create_index(
                    Index::create()
                        .name("idx_ledger_entries_idempotency_key")
                        .table(LedgerEntries::Table)
                        .col(LedgerEntries::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_ledger_entries_payment_ref")
                        .table(LedgerEntries::Table)
                        .col(LedgerEntries::PaymentRef)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_ledger_entries_occurred_at")
                        .table(LedgerEntries::Table)
                        .col(LedgerEntries::OccurredAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> std::result::Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(LedgerEntries::Table).to_owned())
                .await
        }
    }
}
