use std::io::{BufWriter, Write};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use race_snapshots::archive::{MarketArchive, TarArchive};
use race_snapshots::catalog::{scan_archive, Selection};
use race_snapshots::config::Config;
use race_snapshots::error::Result;
use race_snapshots::pipeline::{run_concurrent, run_sequential, scan_archive_concurrent};
use race_snapshots::snapshot::SnapshotEngine;
use race_snapshots::types::SnapshotRow;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Archive ---
    let archive = TarArchive::open(&cfg.archive_path)?;
    if archive.is_empty() {
        warn!("[ARCHIVE] no market entries found in {}", archive.path().display());
    }
    let archive: Arc<dyn MarketArchive> = Arc::new(archive);

    // --- Catalog ---
    let selection = match &cfg.target_market {
        Some(id) => {
            info!("[CATALOG] selecting single market {id}");
            Selection::Market(id.clone())
        }
        None => Selection::Criteria(cfg.selection.clone()),
    };
    let (catalog, stats) = if cfg.workers == 1 {
        scan_archive(archive.as_ref(), &selection)
    } else {
        scan_archive_concurrent(Arc::clone(&archive), Arc::new(selection), cfg.workers).await
    };
    stats.log_summary(catalog.len());
    if catalog.is_empty() {
        warn!("[CATALOG] no market matched the selection; nothing to snapshot");
    }

    // --- Snapshots ---
    let engine = SnapshotEngine::new(cfg.lead_minutes.clone());
    info!("[SNAPSHOT] sampling lead times {:?} min", engine.lead_minutes());
    let store = if cfg.workers == 1 {
        run_sequential(archive.as_ref(), &catalog, &engine)
    } else {
        run_concurrent(archive, Arc::new(catalog), Arc::new(engine), cfg.workers).await
    };

    let rows = store.rows();
    write_rows(&rows)?;
    store.report().log_summary();
    Ok(())
}

/// One JSON object per line on stdout.
fn write_rows(rows: &[SnapshotRow]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in rows {
        serde_json::to_writer(&mut out, row).map_err(std::io::Error::from)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
