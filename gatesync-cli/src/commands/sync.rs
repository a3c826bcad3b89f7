//! Sync command - one reconciliation run for a gateway and record kind.

use anyhow::{Result, bail};
use colored::Colorize;
use gatesync::{GatewayRegistry, SyncRequest, SyncResponse, SyncService};

use crate::cli::SyncArgs;
use crate::{open_store, print_error, print_info, print_json, print_success, print_warning};

/// Run the sync command
pub async fn run(args: SyncArgs, config: &gatesync::Config, json: bool) -> Result<()> {
    let registry = GatewayRegistry::from_config(config)?;
    let store = open_store(config).await?;
    let service = SyncService::from_config(registry, store, config);

    let request = SyncRequest {
        gateway: args.gateway,
        kind: args.kind.into(),
        start_date: args.window.start_date,
        end_date: args.window.end_date,
        lookback_days: args.window.lookback_days,
    };

    if !json {
        println!(
            "\n{} Syncing {} {}s...\n",
            "gatesync".cyan().bold(),
            request.gateway,
            request.kind
        );
    }

    let response = service.run_sync(request).await;

    if json {
        print_json(&response)?;
    } else {
        print_summary(&response);
    }

    if !response.success {
        bail!(
            "sync failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_summary(response: &SyncResponse) {
    print_info(&format!(
        "Window {} to {} ({})",
        response.window.start,
        response.window.end,
        response.source.as_str()
    ));

    for error in &response.errors {
        print_warning(error);
    }

    if response.success {
        print_success(&format!(
            "{} processed, {} created, {} updated",
            response.processed, response.created, response.updated
        ));
    } else if let Some(error) = &response.error {
        print_error(error);
        if response.processed > 0 {
            print_info(&format!(
                "Before stopping: {} processed, {} created, {} updated",
                response.processed, response.created, response.updated
            ));
        }
    }
}
