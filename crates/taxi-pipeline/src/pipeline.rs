// Pipeline orchestration
//
// Runs the two stages in order: raw import into PostgreSQL, then the
// cleaned-collection rebuild in MongoDB. The stages are independent by
// design (the cleaner reads from the source files, not from PostgreSQL),
// so a failed import does not block the rebuild. Errors are collected
// rather than short-circuited; the caller decides the exit status.

use crate::config::Config;
use crate::importer::{ImportReport, PostgresImporter};
use crate::models::PipelineTotals;
use crate::replacer::DocumentReplacer;
use crate::Result;
use std::path::PathBuf;
use tracing::{error, info};

/// Outcome of one full pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub import: Option<ImportReport>,
    pub totals: Option<PipelineTotals>,
    pub errors: Vec<String>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Full import-and-clean pipeline
pub struct TaxiPipeline {
    importer: PostgresImporter,
    replacer: DocumentReplacer,
    raw_data_dir: PathBuf,
}

impl TaxiPipeline {
    pub fn new(importer: PostgresImporter, replacer: DocumentReplacer, raw_data_dir: PathBuf) -> Self {
        Self {
            importer,
            replacer,
            raw_data_dir,
        }
    }

    /// Connect both stores and prepare the PostgreSQL schema.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let importer = PostgresImporter::connect(&config.database, config.source.chunk_size).await?;
        let replacer = DocumentReplacer::connect(
            &config.mongo,
            config.source.chunk_size,
            config.cleaner.clone(),
        )
        .await?;

        Ok(Self::new(importer, replacer, config.source.raw_data_dir.clone()))
    }

    /// Raw import stage only.
    pub async fn run_import(&self) -> Result<ImportReport> {
        self.importer.import_all(&self.raw_data_dir).await
    }

    /// Clean-and-replace stage only.
    pub async fn run_clean(&self) -> Result<PipelineTotals> {
        self.replacer.rebuild(&self.raw_data_dir).await
    }

    /// Run both stages, best effort.
    pub async fn run(&self) -> PipelineReport {
        let mut report = PipelineReport::default();

        info!(dir = %self.raw_data_dir.display(), "pipeline starting");

        match self.run_import().await {
            Ok(import) => report.import = Some(import),
            Err(e) => {
                error!(error = %e, "import stage failed");
                report.errors.push(format!("import stage: {e}"));
            }
        }

        match self.run_clean().await {
            Ok(totals) => report.totals = Some(totals),
            Err(e) => {
                error!(error = %e, "clean stage failed");
                report.errors.push(format!("clean stage: {e}"));
            }
        }

        report
    }
}
