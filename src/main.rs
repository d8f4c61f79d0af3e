//! Kiosk check-in server
//!
//! Serves the kiosk front end: looks up families in Breeze ChMS, checks
//! selected members in concurrently, and prints one label job per family.
//!
//! Module structure:
//! - `domain/` - Core types and the check-in code codec
//! - `io/` - External interfaces (Breeze, printer, HTTP API, Prometheus)
//! - `services/` - Business logic (batch check-in, kiosk session)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use kiosk_checkin::infra::{Config, Metrics};
use kiosk_checkin::io::http_api::{start_api_server, ApiState};
use kiosk_checkin::io::{BreezeClient, Printer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Family check-in kiosk backed by Breeze ChMS
#[derive(Parser, Debug)]
#[command(name = "kiosk-checkin", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/kiosk.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments using clap
    let args = Args::parse();

    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug to see every Breeze response
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "kiosk-checkin starting");

    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    info!(
        config_file = %config.config_file(),
        kiosk_id = %config.kiosk_id(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        breeze_subdomain = %config.breeze_subdomain(),
        printer_mode = %config.printer_mode().as_str(),
        printer_name = %config.printer_name(),
        max_batch_size = %config.max_batch_size(),
        aggregate_labels = ?config.aggregate_labels(),
        "config_loaded"
    );
    if config.breeze_api_key().is_empty() {
        warn!("breeze_api_key_missing");
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let breeze = Arc::new(BreezeClient::new(&config)?);
    let printer = Arc::new(Printer::new(&config));
    let state = Arc::new(ApiState::new(&config, breeze, printer, metrics.clone()));

    // Start metrics reporter (lock-free reads)
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics_clone.snapshot().log();
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.port()).parse()?;
    if let Err(e) = start_api_server(addr, state, shutdown_rx).await {
        error!(error = %e, addr = %addr, "api_server_error");
    }

    metrics.snapshot().log();
    info!("kiosk-checkin shutdown complete");
    Ok(())
}
