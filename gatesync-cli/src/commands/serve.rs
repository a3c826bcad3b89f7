//! Serve command - the HTTP command surface.

use anyhow::{Context, Result};
use colored::Colorize;
use gatesync::{Config, GatewayRegistry, SyncService};

use crate::cli::ServeArgs;
use crate::{open_store, print_info, print_success};

/// Run the serve command until Ctrl+C
pub async fn run(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let addr = config
        .server
        .addr()
        .with_context(|| format!("invalid bind address {}:{}", config.server.host, config.server.port))?;

    let registry = GatewayRegistry::from_config(&config)?;
    let enabled = registry.enabled_gateways();
    let store = open_store(&config).await?;
    let service = SyncService::from_config(registry, store, &config);
    let app = gatesync::command::routes(service);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    println!("\n{} Listening on http://{}\n", "gatesync".cyan().bold(), addr);
    if enabled.is_empty() {
        print_info("No gateways enabled; sync triggers will report not_configured");
    } else {
        let names: Vec<&str> = enabled.iter().map(|g| g.as_str()).collect();
        print_info(&format!("Enabled gateways: {}", names.join(", ")));
    }
    tracing::info!(target: "gatesync::command", %addr, "Command surface started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    print_success("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!(target: "gatesync::command", "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
}
