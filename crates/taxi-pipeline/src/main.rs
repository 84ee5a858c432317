//! Taxi Pipeline - NYC Yellow Taxi import and clean tool

use anyhow::Result;
use clap::Parser;
use taxi_common::logging::{init_logging, LogConfig, LogLevel};
use taxi_pipeline::{Config, TaxiPipeline};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "taxi-pipeline")]
#[command(author, version, about = "NYC Yellow Taxi import and clean pipeline")]
struct Cli {
    /// Pipeline stage to run
    #[command(subcommand)]
    stage: Stage,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Stage {
    /// Import raw Parquet files into PostgreSQL
    Import,

    /// Rebuild the cleaned MongoDB collection and swap it live
    Clean,

    /// Run both stages in order
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Env overrides win; the verbose flag only raises the default level.
    let mut log_config = LogConfig::from_env();
    if cli.verbose {
        log_config = log_config.with_level(LogLevel::Debug);
    }
    init_logging(&log_config)?;

    let config = Config::load()?;
    let pipeline = TaxiPipeline::from_config(&config).await?;

    match cli.stage {
        Stage::Import => {
            info!("Importing raw trip files");
            let report = pipeline.run_import().await?;
            info!(
                imported = report.imported(),
                skipped = report.skipped(),
                failed = report.failed(),
                rows = report.rows_imported,
                "Import complete"
            );
            if report.failed() > 0 {
                anyhow::bail!("{} file(s) failed to import", report.failed());
            }
        }
        Stage::Clean => {
            info!("Rebuilding cleaned collection");
            let totals = pipeline.run_clean().await?;
            info!(
                chunks = totals.chunks,
                rows_read = totals.rows_read,
                rows_kept = totals.rows_kept,
                documents_inserted = totals.documents_inserted,
                "Clean complete"
            );
        }
        Stage::Run => {
            info!("Running full pipeline");
            let report = pipeline.run().await;
            if let Some(ref import) = report.import {
                info!(
                    imported = import.imported(),
                    skipped = import.skipped(),
                    rows = import.rows_imported,
                    "Import stage complete"
                );
            }
            if let Some(totals) = report.totals {
                info!(
                    rows_read = totals.rows_read,
                    rows_kept = totals.rows_kept,
                    documents_inserted = totals.documents_inserted,
                    "Clean stage complete"
                );
            }
            if !report.is_success() {
                anyhow::bail!("pipeline finished with errors: {}", report.errors.join("; "));
            }
        }
    }

    info!("Pipeline complete");
    Ok(())
}
