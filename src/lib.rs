//! Gatesync - gateway synchronization and fee reconciliation
//!
//! Gatesync pulls subscriptions, payments and customers from Brazilian
//! payment gateways (Asaas, PagBank, Mercado Pago, Pagar.me), merges them
//! idempotently into local storage and keeps a fee ledger whose platform
//! fees follow a month-to-date GMV tier schedule.
//!
//! # Features
//!
//! - **Sync**: paginated, retried, idempotent import runs per gateway and kind
//! - **Ledger**: charges, refunds and adjustments with `net = gross - fee`
//! - **Fee tiers**: validated GMV schedules with month-to-date lookups
//! - **Reporting**: rollups by day, gateway, tier, payment method or entry type
//! - **Storage**: in-memory store, or SeaORM (Postgres/SQLite) with `database`
//! - **HTTP**: an axum command surface for triggers and dashboards
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gatesync::{ConfigBuilder, GatewayRegistry, InMemorySyncStore, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     gatesync::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     let registry = GatewayRegistry::from_config(&config)?;
//!     let service = SyncService::from_config(registry, InMemorySyncStore::new(), &config);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, gatesync::command::routes(service)).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod command;
pub mod config;
mod error;
pub mod fees;
pub mod gateway;
pub mod ledger;
pub mod matcher;
pub mod money;
pub mod reporting;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod window;

// Re-exports for public API
pub use audit::{NoOpAuditLogger, SyncAuditEvent, SyncAuditLogger, TracingAuditLogger};
pub use command::{SyncResponse, SyncService};
pub use config::{Config, ConfigBuilder, GatewayConfig, LoggingConfig, SyncConfig};
pub use error::{GatesyncError, GatewayError, Result};
pub use fees::{FeeQuote, FeeTier, TierProgress, TierSchedule};
pub use gateway::{
    GatewayClient, GatewayId, GatewayRegistry, PaymentMethod, PaymentState, RecordKind,
    RemoteRecord,
};
pub use ledger::{
    EntryStatus, EntryType, FeeRequest, LedgerEntry, LedgerError, LedgerWriter, Posting,
    RefundFeePolicy, SettlementRequest,
};
pub use matcher::{MatchDecision, RecordMatcher};
pub use reporting::{
    GroupBy, LedgerRollup, LedgerSummary, RecordGroupBy, RecordRollup, ReportingAggregator,
};
#[cfg(feature = "database")]
pub use storage::SeaOrmSyncStore;
pub use storage::{InMemorySyncStore, SyncStore};
pub use sync::{SyncAbort, SyncGate, SyncOrchestrator, SyncReport, SyncRequest, SyncSource};
pub use window::SyncWindow;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "gatesync::sync=debug")
/// - `GATESYNC_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = utils::get_env_with_prefix("LOG_JSON")
        .and_then(|v| utils::parse_flag(&v))
        .unwrap_or(false);

    install(env_filter, json_logs);
}

/// Initialize tracing from [`LoggingConfig`]. `RUST_LOG` still wins when set.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    install(env_filter, config.logging.json);
}

fn install(env_filter: EnvFilter, json: bool) {
    // try_init: a second call (tests, embedding apps) keeps the first subscriber.
    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
