//! Report command - ledger rollups over a window.

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use gatesync::command::RollupResponse;
use gatesync::{GroupBy, ReportingAggregator, SyncWindow};
use std::sync::Arc;

use crate::cli::ReportArgs;
use crate::{open_store, print_info, print_json};

/// Run the report command
pub async fn run(args: ReportArgs, config: &gatesync::Config, json: bool) -> Result<()> {
    let group_by: GroupBy = args.group_by.into();
    let window = SyncWindow::resolve(
        args.window.start_date.as_deref(),
        args.window.end_date.as_deref(),
        args.window.lookback_days,
        config.sync.lookback_days,
        Utc::now().date_naive(),
    );

    let store = open_store(config).await?;
    let reports = ReportingAggregator::new(store, Arc::new(config.fees.schedule.clone()));
    let rows = reports.rollup(group_by, &window).await?;
    let summary = reports.summary(&window).await?;

    if json {
        return print_json(&RollupResponse {
            group_by,
            window,
            rows,
            summary,
        });
    }

    println!(
        "\n{} Ledger by {} from {} to {}\n",
        "gatesync".cyan().bold(),
        args.group_by,
        window.start,
        window.end
    );

    if rows.is_empty() {
        print_info("No ledger entries in this window");
        return Ok(());
    }

    println!(
        "  {:<20} {:>8} {:>14} {:>12} {:>14}",
        "group".bold(),
        "entries".bold(),
        "gross".bold(),
        "fee".bold(),
        "net".bold()
    );
    for row in &rows {
        println!(
            "  {:<20} {:>8} {:>14} {:>12} {:>14}",
            row.key, row.entries, row.gross, row.fee, row.net
        );
    }
    println!(
        "  {:<20} {:>8} {:>14} {:>12} {:>14}",
        "total".dimmed(),
        summary.entries,
        summary.gross,
        summary.fee,
        summary.net
    );
    println!();
    print_info(&format!(
        "{} charges ({}), {} refunds ({}), {} settlements, {} fees, {} adjustments",
        summary.charges,
        summary.charged_gross,
        summary.refunds,
        summary.refunded_gross,
        summary.settlements,
        summary.fees,
        summary.adjustments
    ));

    Ok(())
}
