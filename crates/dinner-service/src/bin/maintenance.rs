//! One-off reconciliation sweep.
//!
//! Reconciles every user in the configured store against Stripe and prints
//! the report as JSON. Nothing is written unless `--apply` is given.
//!
//! ```text
//! dinner-maintenance            # dry run
//! dinner-maintenance --apply    # write corrections
//! ```

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dinner_service::{AppState, ServiceConfig, StoreHandle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dinner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut apply = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--apply" => apply = true,
            "--dry-run" => apply = false,
            "-h" | "--help" => {
                eprintln!("usage: dinner-maintenance [--apply | --dry-run]");
                return Ok(());
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }

    let config = ServiceConfig::from_env();
    let handle = StoreHandle::open(&config).await?;
    let state = AppState::new(Arc::clone(&handle.store), config);

    if !state.has_billing() {
        tracing::warn!("Stripe not configured - only local expiry will be corrected");
    }

    tracing::info!(dry_run = !apply, "Starting reconciliation sweep");
    let report = state.engine.reconcile_all(!apply).await;
    handle.close().await;
    let report = report?;

    tracing::info!(
        checked = report.checked,
        changed = report.changed,
        failed = report.failed,
        "Reconciliation sweep finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
