//! s3sync command-line entry point

use clap::Parser;
use s3sync_core::inventory;
use s3sync_core::metrics::SyncMetrics;
use s3sync_core::split::FileSplitter;
use s3sync_core::storage::{MemoryObjectStore, ObjectStore, S3Client, S3Config};
use s3sync_core::upload::reconcile;
use s3sync_core::{BatchDriver, JsonLedger, ShutdownSignal, SyncConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Sync a directory tree to S3-compatible storage", long_about = None)]
struct Cli {
    /// Directory to sync
    root: PathBuf,
    /// Only sync files whose name ends with this suffix (repeatable)
    #[arg(long = "filter", short = 'f')]
    filters: Vec<String>,
    /// Store objects in the deep archive tier
    #[arg(long)]
    deep: bool,
    /// Ledger location (default: <ROOT>/.s3sync/ledger.json)
    #[arg(long)]
    ledger: Option<PathBuf>,
    /// Upload to an in-memory store instead of S3
    #[arg(long)]
    dry_run: bool,
    /// Skip checking unfinished transfers against the store
    #[arg(long)]
    no_reconcile: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::new(&cli.root);
    config.filters = cli.filters;
    config.deep = cli.deep;
    if let Some(ledger_path) = cli.ledger {
        config.set_ledger_path(ledger_path);
    }
    config.s3 = S3Config::from_env();
    config.validate()?;

    info!("Starting s3sync for {}", config.root.display());

    let ledger = JsonLedger::open(&config.ledger_path)?;

    let dry_run_store = cli.dry_run.then(|| Arc::new(MemoryObjectStore::new()));
    let store: Arc<dyn ObjectStore> = if let Some(memory) = &dry_run_store {
        info!("Dry run: uploading to memory");
        memory.clone()
    } else {
        info!("Uploading to bucket {} at {}", config.s3.bucket, config.s3.endpoint);
        Arc::new(S3Client::new(config.s3.clone())?)
    };

    let shutdown = ShutdownSignal::new();
    {
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current step");
                signal.shutdown();
            }
        });
    }

    if !cli.no_reconcile {
        reconcile(&ledger, store.as_ref()).await?;
    }

    let inventory = inventory::scan(&config.root, &config.filters, &config.scan_excludes())?;
    inventory::update_manifest(&ledger, &inventory, config.max_object_size)?;
    let units = inventory::changed_units(
        &ledger,
        &inventory,
        config.max_object_size,
        config.piece_size,
    )?;

    let metrics = Arc::new(SyncMetrics::new());
    let driver = BatchDriver::new(
        store,
        Arc::new(FileSplitter::new()),
        &config,
        metrics.clone(),
        shutdown,
    );

    let result = driver.upload_all(&ledger, &units, config.deep).await;
    debug!("Metrics:\n{}", metrics.export());
    if let Some(memory) = &dry_run_store {
        info!(
            "Dry run would have stored {} objects ({} bytes)",
            memory.len(),
            memory.total_bytes()
        );
    }

    match result {
        Ok(report) => {
            info!(
                "Sync finished: {} files, {} split files, {} parts, {} unchanged",
                report.files_uploaded, report.files_split, report.parts_uploaded, report.skipped
            );
            Ok(())
        }
        Err(e) => {
            error!("Sync stopped: {}", e);
            Err(e.into())
        }
    }
}
