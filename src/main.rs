//! FoodFilter - terminal driver for the scan arbitration pipeline
//!
//! # Overview
//!
//! Reads decoded barcodes from stdin (one per line), runs them through the
//! [`ScanArbiter`], and prints what a scanner screen would show. It initializes:
//! - Configuration ([`ConfigManager`], `foodfilter.yaml` + `FOODFILTER_*` overrides)
//! - Logging infrastructure (file rotation + optional console output)
//! - Tokio async runtime (2 worker threads for lookups and persistence)
//! - The arbiter with a catalog lookup client and a JSON-lines activity log
//!
//! # Input
//!
//! - `<barcode>`: a detection
//! - `:reset`: abandon the current scan and return to scanning
//! - `:restrictions Milk, Egg`: replace the restriction set for future scans
//! - `:activity [good|bad]`: print the saved activity history
//! - `:quit`: exit
//!
//! # Configuration Files
//!
//! Expected in the directory given as the first argument (default `FoodFilter Data/`):
//! - `foodfilter.yaml`: Scanner, profile, storage and logging settings
//! - `catalog/<barcode>.json`: Product documents
//! - `activity.jsonl`: Saved scans (created on first save)

use anyhow::{Context, Result};
use foodfilter::services::{
    ActivityFilter, CatalogLookupClient, JsonlRecordSink, filter_activity, load_activity,
};
use foodfilter::{
    APP_NAME, ArbiterConfig, ArbiterHandle, ConfigManager, DetectionEvent, RestrictionSet,
    ScanArbiter, StateChange, VERSION,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

const DEFAULT_CONFIG_DIR: &str = "FoodFilter Data";

fn main() -> Result<()> {
    let config_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());

    let config_manager = ConfigManager::new(config_dir.as_str())?;
    let config = config_manager.load_config()?;

    // Keep the guard alive until exit so buffered log lines are flushed
    let _log_guard = foodfilter::logging::init_logging(
        &config.logging,
        &config_manager.resolve(&config.logging.log_dir),
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("foodfilter-worker")
        .build()?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 2);

    let catalog_dir = config_manager.resolve(&config.storage.catalog_dir);
    let activity_file = config_manager.resolve(&config.storage.activity_file);
    let restrictions = config.profile.restriction_set();

    tracing::info!(
        "Catalog: {}, activity: {}, restrictions: {}",
        catalog_dir,
        activity_file,
        restrictions.len()
    );

    let result = runtime.block_on(async {
        let arbiter = ScanArbiter::spawn(
            ArbiterConfig::from(&config.scanner),
            Arc::new(CatalogLookupClient::new(&catalog_dir)),
            Arc::new(JsonlRecordSink::new(&activity_file)),
            restrictions,
        );

        let printer = tokio::spawn(print_changes(arbiter.subscribe()));
        println!("{}", arbiter.state().read(|s| s.phase.message()));

        let input = read_commands(arbiter.handle(), &activity_file).await;

        let shutdown = arbiter.shutdown().await;
        printer.abort();
        input.and(shutdown.map_err(anyhow::Error::from))
    });

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result
}

/// Feed stdin lines to the arbiter until EOF or `:quit`
async fn read_commands(handle: ArbiterHandle, activity_file: &camino::Utf8Path) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            (":quit", _) => break,
            (":reset", _) => handle.reset().await?,
            (":restrictions", names) => {
                let set: RestrictionSet = names.split(',').collect();
                handle.set_restrictions(set).await?;
            }
            (":activity", which) => print_activity(activity_file, which.trim())?,
            _ => handle.detect(DetectionEvent::new(line)).await?,
        }
    }

    Ok(())
}

fn print_activity(activity_file: &camino::Utf8Path, which: &str) -> Result<()> {
    let filter = match which {
        "good" => ActivityFilter::Good,
        "bad" => ActivityFilter::Bad,
        _ => ActivityFilter::All,
    };

    let history = load_activity(activity_file)?;
    let selected = filter_activity(&history, filter);
    if selected.is_empty() {
        println!("No scanned items yet.");
    }
    for outcome in selected {
        println!(
            "[{}] {} {} - {}",
            outcome.observed_at.format("%Y-%m-%d %H:%M:%S"),
            if outcome.is_safe { "OK " } else { "BAD" },
            outcome.product_name,
            outcome.ingredients_text
        );
    }
    Ok(())
}

async fn print_changes(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(StateChange::Scanning) => println!("Scanning for Barcode..."),
            Ok(StateChange::BarcodeDetected { code }) => println!("Scanned Barcode: {}", code),
            Ok(StateChange::ScanResolved {
                product_name,
                verdict,
                ..
            }) => println!("{}: {}", product_name, verdict.summary()),
            Ok(StateChange::LookupFailed { error, .. }) => println!("{}", error),
            Ok(StateChange::PersistFailed { message }) => eprintln!("{}", message),
            Ok(StateChange::RestrictionsChanged { count }) => {
                println!("Restrictions updated ({} active)", count)
            }
            Ok(StateChange::RecordPersisted { .. } | StateChange::StateReset) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Display lagged - {} events were skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
