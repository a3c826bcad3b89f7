//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use gatesync::{GatewayId, GroupBy, RecordKind};

#[derive(Parser)]
#[command(name = "gatesync")]
#[command(version)]
#[command(about = "Sync payment gateways into a local ledger and report on fees", long_about = None)]
pub struct Cli {
    /// Print results as JSON instead of text
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull one record kind from a gateway and reconcile it
    Sync(SyncArgs),

    /// Ledger rollups over a date window
    Report(ReportArgs),

    /// Month-to-date GMV and fee tier standing
    Tier(TierArgs),

    /// Apply database migrations
    Migrate(MigrateArgs),

    /// Serve the HTTP command surface
    Serve(ServeArgs),
}

/// Date window shared by `sync` and `report`. Values that do not parse
/// fall back to the lookback window.
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// First day of the window (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last day of the window (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<String>,

    /// Days back from today when no valid dates are given
    #[arg(long)]
    pub lookback_days: Option<i64>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Gateway to pull from (asaas, pagbank, mercado_pago, pagarme)
    pub gateway: GatewayId,

    /// Record kind to pull
    #[arg(value_enum, default_value = "payment")]
    pub kind: Kind,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Rollup dimension
    #[arg(value_enum, default_value = "gateway")]
    pub group_by: Grouping,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug)]
pub struct TierArgs {
    /// Measure progress at the end of this day (YYYY-MM-DD); defaults to now
    #[arg(long)]
    pub as_of: Option<String>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Roll back this many migrations instead of applying
    #[arg(long)]
    pub rollback: Option<u32>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind host; overrides GATESYNC_HOST
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port; overrides GATESYNC_PORT
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Kind {
    Subscription,
    Payment,
    Customer,
}

impl From<Kind> for RecordKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Subscription => RecordKind::Subscription,
            Kind::Payment => RecordKind::Payment,
            Kind::Customer => RecordKind::Customer,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Grouping {
    Day,
    Gateway,
    Tier,
    PaymentMethod,
    EntryType,
}

impl From<Grouping> for GroupBy {
    fn from(grouping: Grouping) -> Self {
        match grouping {
            Grouping::Day => GroupBy::Day,
            Grouping::Gateway => GroupBy::Gateway,
            Grouping::Tier => GroupBy::Tier,
            Grouping::PaymentMethod => GroupBy::PaymentMethod,
            Grouping::EntryType => GroupBy::EntryType,
        }
    }
}

impl std::fmt::Display for Grouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", GroupBy::from(*self).as_str())
    }
}
