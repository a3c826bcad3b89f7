//! Tier command - where month-to-date GMV sits in the fee schedule.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use gatesync::window::parse_date;
use gatesync::{ReportingAggregator, SyncWindow};
use std::sync::Arc;

use crate::cli::TierArgs;
use crate::{open_store, print_info, print_json, print_success};

/// Run the tier command
pub async fn run(args: TierArgs, config: &gatesync::Config, json: bool) -> Result<()> {
    let as_of = match args.as_of.as_deref() {
        None => Utc::now(),
        Some(raw) => {
            let day = parse_date(raw).context("--as-of must be YYYY-MM-DD")?;
            SyncWindow::new(day, day).end_instant()
        }
    };

    let store = open_store(config).await?;
    let reports = ReportingAggregator::new(store, Arc::new(config.fees.schedule.clone()));
    let progress = reports.tier_progress(as_of).await?;

    if json {
        return print_json(&progress);
    }

    println!("\n{} Fee tier as of {}\n", "gatesync".cyan().bold(), as_of);
    print_success(&format!(
        "Tier {} at {}% (GMV {})",
        progress.current.tier_number, progress.current.fee_percent, progress.gmv
    ));

    match (&progress.next, progress.remaining_to_next) {
        (Some(next), Some(remaining)) => print_info(&format!(
            "{} more to reach tier {} at {}%",
            remaining, next.tier_number, next.fee_percent
        )),
        _ => print_info("Already in the last tier"),
    }

    Ok(())
}
