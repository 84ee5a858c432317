// Raw Trip Storage Layer
//
// Loads Parquet trip files into PostgreSQL and keeps the per-file import
// ledger that makes reruns idempotent: completed files are skipped, and
// files left partial by a crash are wiped and reloaded whole. A session
// advisory lock serializes importers, so a competing run fails fast
// instead of corrupting the ledger.

use crate::config::DatabaseConfig;
use crate::models::RawTrip;
use crate::reader::{list_parquet_files, TripChunkReader};
use crate::{PipelineError, Result, LEDGER_TABLE, TRIPS_TABLE};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::path::Path;
use taxi_common::checksum::file_fingerprint;
use tracing::{info, warn};

/// Rows per INSERT statement. Each row binds 20 parameters and PostgreSQL
/// caps a statement at 65535 binds, so this stays well under the limit.
const INSERT_SUB_BATCH: usize = 1_000;

/// Advisory lock key for the import ledger. Arbitrary but fixed; every
/// importer build must agree on it.
const IMPORT_LOCK_KEY: i64 = 0x5441_5849_4C4F_4144;

/// Ledger status values.
const STATUS_PENDING: &str = "pending";
const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";

/// What happened to one source file during an import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Imported { file: String, rows: u64 },
    Skipped { file: String },
    Failed { file: String, error: String },
}

/// Aggregate result of one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub files: Vec<FileOutcome>,
    pub rows_imported: u64,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f, FileOutcome::Imported { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f, FileOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f, FileOutcome::Failed { .. }))
            .count()
    }
}

/// Storage handler for raw trips and the import ledger
pub struct PostgresImporter {
    pool: PgPool,
    chunk_size: usize,
}

impl PostgresImporter {
    pub fn new(pool: PgPool, chunk_size: usize) -> Self {
        Self { pool, chunk_size }
    }

    /// Connect a pool and create the trip and ledger tables if needed.
    pub async fn connect(config: &DatabaseConfig, chunk_size: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let importer = Self::new(pool, chunk_size);
        importer.ensure_schema().await?;
        Ok(importer)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the raw trips table and the import ledger.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TRIPS_TABLE} (
                id BIGSERIAL PRIMARY KEY,
                vendor_id BIGINT,
                tpep_pickup_datetime TIMESTAMP,
                tpep_dropoff_datetime TIMESTAMP,
                passenger_count BIGINT,
                trip_distance DOUBLE PRECISION,
                ratecode_id BIGINT,
                store_and_fwd_flag TEXT,
                pu_location_id BIGINT,
                do_location_id BIGINT,
                payment_type BIGINT,
                fare_amount DOUBLE PRECISION,
                extra DOUBLE PRECISION,
                mta_tax DOUBLE PRECISION,
                tip_amount DOUBLE PRECISION,
                tolls_amount DOUBLE PRECISION,
                improvement_surcharge DOUBLE PRECISION,
                total_amount DOUBLE PRECISION,
                congestion_surcharge DOUBLE PRECISION,
                airport_fee DOUBLE PRECISION,
                source_file TEXT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{TRIPS_TABLE}_source_file \
             ON {TRIPS_TABLE} (source_file)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
                file_name TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                import_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                rows_imported BIGINT NOT NULL DEFAULT 0,
                checksum TEXT
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Import every Parquet file in `dir`, in lexical order.
    ///
    /// Files the ledger records as completed are skipped. One file's
    /// failure is logged and does not stop the remaining files. Fails
    /// with `LedgerConflict` when another importer holds the ledger lock.
    pub async fn import_all(&self, dir: impl AsRef<Path>) -> Result<ImportReport> {
        let files = list_parquet_files(dir.as_ref())?;
        if files.is_empty() {
            info!(dir = %dir.as_ref().display(), "no parquet files to import");
            return Ok(ImportReport::default());
        }

        // Hold the lock on a dedicated connection for the whole run;
        // session advisory locks release if the connection dies.
        let mut lock_conn = self.pool.acquire().await?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(IMPORT_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await?;
        if !locked {
            return Err(PipelineError::LedgerConflict(
                "another import run holds the ledger lock".to_string(),
            ));
        }

        let result = self.import_files(&files).await;

        // Unlock explicitly; the connection goes back to the pool and
        // would otherwise keep the lock alive.
        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(IMPORT_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
        {
            warn!(error = %e, "failed to release ledger lock");
        }

        result
    }

    async fn import_files(&self, files: &[std::path::PathBuf]) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for path in files {
            let file_name = ledger_file_name(path);

            if self.is_completed(&file_name).await? {
                info!(file = %file_name, "already imported, skipping");
                report.files.push(FileOutcome::Skipped { file: file_name });
                continue;
            }

            match self.import_file(path, &file_name).await {
                Ok(rows) => {
                    info!(file = %file_name, rows, "file imported");
                    report.rows_imported += rows;
                    report.files.push(FileOutcome::Imported {
                        file: file_name,
                        rows,
                    });
                }
                Err(e) => {
                    warn!(file = %file_name, error = %e, "file import failed, continuing");
                    self.mark_failed(&file_name).await;
                    report.files.push(FileOutcome::Failed {
                        file: file_name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            imported = report.imported(),
            skipped = report.skipped(),
            failed = report.failed(),
            rows = report.rows_imported,
            "import run finished"
        );

        Ok(report)
    }

    async fn is_completed(&self, file_name: &str) -> Result<bool> {
        let status: Option<String> =
            sqlx::query_scalar(&format!(
                "SELECT status FROM {LEDGER_TABLE} WHERE file_name = $1"
            ))
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(status.as_deref() == Some(STATUS_COMPLETED))
    }

    /// Load one file whole. Any rows left by an earlier partial attempt
    /// are deleted first, so a retry never duplicates.
    async fn import_file(&self, path: &Path, file_name: &str) -> Result<u64> {
        let checksum = file_fingerprint(path)
            .map_err(|e| PipelineError::source_read(path, e))?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {LEDGER_TABLE} (file_name, status, rows_imported, checksum)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (file_name) DO UPDATE SET
                status = EXCLUDED.status,
                rows_imported = 0,
                checksum = EXCLUDED.checksum,
                import_date = NOW()
            "#
        ))
        .bind(file_name)
        .bind(STATUS_PENDING)
        .bind(&checksum)
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "DELETE FROM {TRIPS_TABLE} WHERE source_file = $1"
        ))
        .bind(file_name)
        .execute(&self.pool)
        .await?;

        let reader = TripChunkReader::open(path, self.chunk_size)?;
        let mut rows_imported: u64 = 0;

        for chunk in reader {
            let chunk = chunk?;
            self.insert_chunk(&chunk, file_name).await?;
            rows_imported += chunk.len() as u64;
        }

        sqlx::query(&format!(
            r#"
            UPDATE {LEDGER_TABLE}
            SET status = $2, rows_imported = $3, import_date = NOW()
            WHERE file_name = $1
            "#
        ))
        .bind(file_name)
        .bind(STATUS_COMPLETED)
        .bind(rows_imported as i64)
        .execute(&self.pool)
        .await?;

        Ok(rows_imported)
    }

    /// Insert one chunk atomically. The chunk is split into sub-batches
    /// to respect the bind-parameter limit, inside a single transaction.
    async fn insert_chunk(&self, chunk: &[RawTrip], file_name: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for batch in chunk.chunks(INSERT_SUB_BATCH) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                r#"
                INSERT INTO {TRIPS_TABLE} (
                    vendor_id,
                    tpep_pickup_datetime,
                    tpep_dropoff_datetime,
                    passenger_count,
                    trip_distance,
                    ratecode_id,
                    store_and_fwd_flag,
                    pu_location_id,
                    do_location_id,
                    payment_type,
                    fare_amount,
                    extra,
                    mta_tax,
                    tip_amount,
                    tolls_amount,
                    improvement_surcharge,
                    total_amount,
                    congestion_surcharge,
                    airport_fee,
                    source_file
                )
                "#
            ));

            query_builder.push_values(batch, |mut b, trip| {
                b.push_bind(trip.vendor_id)
                    .push_bind(trip.tpep_pickup_datetime)
                    .push_bind(trip.tpep_dropoff_datetime)
                    .push_bind(trip.passenger_count)
                    .push_bind(trip.trip_distance)
                    .push_bind(trip.ratecode_id)
                    .push_bind(trip.store_and_fwd_flag.as_deref())
                    .push_bind(trip.pu_location_id)
                    .push_bind(trip.do_location_id)
                    .push_bind(trip.payment_type)
                    .push_bind(trip.fare_amount)
                    .push_bind(trip.extra)
                    .push_bind(trip.mta_tax)
                    .push_bind(trip.tip_amount)
                    .push_bind(trip.tolls_amount)
                    .push_bind(trip.improvement_surcharge)
                    .push_bind(trip.total_amount)
                    .push_bind(trip.congestion_surcharge)
                    .push_bind(trip.airport_fee)
                    .push_bind(file_name);
            });

            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Best effort; the original error matters more than this update.
    /// Upserts, because a file that failed before its pending mark (for
    /// example an unreadable path) has no ledger row yet.
    async fn mark_failed(&self, file_name: &str) {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {LEDGER_TABLE} (file_name, status, rows_imported)
            VALUES ($1, $2, 0)
            ON CONFLICT (file_name) DO UPDATE SET
                status = EXCLUDED.status,
                import_date = NOW()
            "#
        ))
        .bind(file_name)
        .bind(STATUS_FAILED)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(file = %file_name, error = %e, "failed to mark ledger entry failed");
        }
    }
}

/// Ledger key for a source path: the bare file name.
fn ledger_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_report_counters() {
        let report = ImportReport {
            files: vec![
                FileOutcome::Imported {
                    file: "a.parquet".to_string(),
                    rows: 10,
                },
                FileOutcome::Skipped {
                    file: "b.parquet".to_string(),
                },
                FileOutcome::Failed {
                    file: "c.parquet".to_string(),
                    error: "boom".to_string(),
                },
                FileOutcome::Imported {
                    file: "d.parquet".to_string(),
                    rows: 5,
                },
            ],
            rows_imported: 15,
        };

        assert_eq!(report.imported(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_ledger_file_name_is_bare_name() {
        let path = PathBuf::from("/data/raw/yellow_tripdata_2025-01.parquet");
        assert_eq!(ledger_file_name(&path), "yellow_tripdata_2025-01.parquet");
    }

    #[test]
    fn test_sub_batch_stays_under_bind_limit() {
        // 20 binds per row.
        assert!(INSERT_SUB_BATCH * 20 < 65535);
    }

    use crate::reader::tests::{write_trips_file, TestTrip};

    async fn trip_count(pool: &PgPool, file_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {TRIPS_TABLE} WHERE source_file = $1"
        ))
        .bind(file_name)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    async fn ledger_status(pool: &PgPool, file_name: &str) -> Result<Option<String>> {
        let status = sqlx::query_scalar(&format!(
            "SELECT status FROM {LEDGER_TABLE} WHERE file_name = $1"
        ))
        .bind(file_name)
        .fetch_optional(pool)
        .await?;
        Ok(status)
    }

    #[sqlx::test]
    async fn test_rerun_skips_completed_files(pool: PgPool) -> Result<()> {
        let importer = PostgresImporter::new(pool.clone(), 4);
        importer.ensure_schema().await?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("yellow_tripdata_2025-01.parquet");
        let trips: Vec<TestTrip> = (1..=10).map(TestTrip::valid).collect();
        write_trips_file(&path, &trips);

        let first = importer.import_all(dir.path()).await?;
        assert_eq!(first.imported(), 1);
        assert_eq!(first.rows_imported, 10);

        let second = importer.import_all(dir.path()).await?;
        assert_eq!(second.imported(), 0);
        assert_eq!(second.skipped(), 1);
        assert_eq!(second.rows_imported, 0);

        // The second run inserted nothing.
        let count = trip_count(&pool, "yellow_tripdata_2025-01.parquet").await?;
        assert_eq!(count, 10);

        Ok(())
    }

    #[sqlx::test]
    async fn test_retry_wipes_partial_rows(pool: PgPool) -> Result<()> {
        let importer = PostgresImporter::new(pool.clone(), 4);
        importer.ensure_schema().await?;

        let dir = tempfile::tempdir()?;
        let file_name = "yellow_tripdata_2025-02.parquet";
        let path = dir.path().join(file_name);
        let trips: Vec<TestTrip> = (1..=6).map(TestTrip::valid).collect();
        write_trips_file(&path, &trips);

        // A crashed earlier attempt: pending ledger entry plus stray rows.
        sqlx::query(&format!(
            "INSERT INTO {LEDGER_TABLE} (file_name, status) VALUES ($1, $2)"
        ))
        .bind(file_name)
        .bind(STATUS_PENDING)
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "INSERT INTO {TRIPS_TABLE} (vendor_id, source_file) VALUES (1, $1), (1, $1)"
        ))
        .bind(file_name)
        .execute(&pool)
        .await?;

        let report = importer.import_all(dir.path()).await?;
        assert_eq!(report.imported(), 1);
        assert_eq!(report.rows_imported, 6);

        // The stray rows are gone; only the full reload remains.
        let count = trip_count(&pool, file_name).await?;
        assert_eq!(count, 6);
        assert_eq!(
            ledger_status(&pool, file_name).await?.as_deref(),
            Some(STATUS_COMPLETED)
        );

        Ok(())
    }

    #[sqlx::test]
    async fn test_unreadable_file_recorded_failed(pool: PgPool) -> Result<()> {
        let importer = PostgresImporter::new(pool.clone(), 4);
        importer.ensure_schema().await?;

        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("bad.parquet"), b"not a parquet file")?;

        let report = importer.import_all(dir.path()).await?;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.rows_imported, 0);

        // The failure lands in the ledger, not just the report.
        assert_eq!(
            ledger_status(&pool, "bad.parquet").await?.as_deref(),
            Some(STATUS_FAILED)
        );
        assert_eq!(trip_count(&pool, "bad.parquet").await?, 0);

        Ok(())
    }
}
