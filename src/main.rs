//! alertd - distributed alert dispatcher

use alertd::{app::App, cli::Cli, config::Config};
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("alertd starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Lock Root: {}", config.lock.root_path);
    info!(
        "Lock Retry Backoff: {}ms..{}ms",
        config.lock.retry_initial_backoff_ms, config.lock.retry_max_backoff_ms
    );
    match config.lock.wait_timeout_seconds {
        Some(seconds) => info!("Lock Wait Timeout: {}s", seconds),
        None => info!("Lock Wait Timeout: unbounded"),
    }
    info!("Max Jitter: {}s", config.dispatch.max_jitter_seconds);
    info!(
        "Metrics: {}",
        if config.metrics.enabled {
            config.metrics.listen_address.to_string()
        } else {
            "Disabled".to_string()
        }
    );
    if let Some(path) = &config.repository.seed_file {
        info!("Seed File: {}", path.display());
    }
    info!("Log Channel: {}", config.channels.log_enabled);
    if let Some(webhook) = &config.channels.webhook {
        info!("Webhook Channel: {}", webhook.name);
    }
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("alertd stopped.");
    Ok(())
}
