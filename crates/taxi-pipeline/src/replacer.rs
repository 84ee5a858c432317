// Cleaned Trip Document Store
//
// Rebuilds the cleaned MongoDB collection from the Parquet sources.
// Everything is written into a staging collection first; once the whole
// rebuild succeeds, a server-side rename with dropTarget swaps it over
// the live collection, so readers always see either the old complete
// dataset or the new one. A failed rebuild drops the staging collection
// and leaves the live one untouched.

use crate::cleaner::{clean_batch, CleanerConfig};
use crate::config::MongoConfig;
use crate::models::{CleanTrip, PipelineTotals};
use crate::reader::{list_parquet_files, TripChunkReader};
use crate::{Result, LIVE_COLLECTION, STAGING_COLLECTION};
use bson::{doc, Document};
use mongodb::Client;
use std::path::Path;
use tracing::{info, warn};

/// Rebuild handler for the cleaned document collection
pub struct DocumentReplacer {
    client: Client,
    db_name: String,
    chunk_size: usize,
    cleaner: CleanerConfig,
}

impl DocumentReplacer {
    pub fn new(client: Client, db_name: String, chunk_size: usize, cleaner: CleanerConfig) -> Self {
        Self {
            client,
            db_name,
            chunk_size,
            cleaner,
        }
    }

    pub async fn connect(
        config: &MongoConfig,
        chunk_size: usize,
        cleaner: CleanerConfig,
    ) -> Result<Self> {
        let client = Client::with_uri_str(&config.url).await?;
        Ok(Self::new(
            client,
            config.database.clone(),
            chunk_size,
            cleaner,
        ))
    }

    /// Rebuild the cleaned collection from every Parquet file in `dir`,
    /// then atomically swap it live. An empty source set swaps in an
    /// empty collection.
    pub async fn rebuild(&self, dir: impl AsRef<Path>) -> Result<PipelineTotals> {
        let files = list_parquet_files(dir.as_ref())?;
        info!(
            files = files.len(),
            staging = STAGING_COLLECTION,
            "rebuilding cleaned collection"
        );

        let db = self.client.database(&self.db_name);
        let staging = db.collection::<Document>(STAGING_COLLECTION);

        // Start from a clean, existing staging collection; the rename
        // below requires the source to exist even when no documents land.
        staging.drop().await?;
        db.create_collection(STAGING_COLLECTION).await?;

        let totals = match self.build_staging(&files).await {
            Ok(totals) => totals,
            Err(e) => {
                if let Err(drop_err) = staging.drop().await {
                    warn!(error = %drop_err, "failed to drop staging collection after error");
                }
                return Err(e);
            }
        };

        self.swap_live().await?;

        info!(
            chunks = totals.chunks,
            rows_read = totals.rows_read,
            rows_kept = totals.rows_kept,
            documents_inserted = totals.documents_inserted,
            "cleaned collection is live"
        );

        Ok(totals)
    }

    async fn build_staging(&self, files: &[std::path::PathBuf]) -> Result<PipelineTotals> {
        let db = self.client.database(&self.db_name);
        let staging = db.collection::<Document>(STAGING_COLLECTION);
        let mut totals = PipelineTotals::default();

        for path in files {
            let reader = TripChunkReader::open(path, self.chunk_size)?;

            for chunk in reader {
                let chunk = chunk?;
                let (kept, result) = clean_batch(&chunk, &self.cleaner);

                let inserted = if kept.is_empty() {
                    0
                } else {
                    let docs: Vec<Document> = kept.iter().map(trip_document).collect();
                    let count = docs.len() as u64;
                    staging.insert_many(docs).await?;
                    count
                };

                totals.absorb(result, inserted);
            }

            info!(file = %path.display(), "file cleaned into staging");
        }

        Ok(totals)
    }

    /// Server-side rename with dropTarget; atomic from a reader's view.
    async fn swap_live(&self) -> Result<()> {
        let admin = self.client.database("admin");
        admin
            .run_command(doc! {
                "renameCollection": format!("{}.{}", self.db_name, STAGING_COLLECTION),
                "to": format!("{}.{}", self.db_name, LIVE_COLLECTION),
                "dropTarget": true,
            })
            .await?;

        Ok(())
    }
}

/// Explicit document shape for one cleaned trip. Absent optional fields
/// are stored as null so every document carries the full schema.
fn trip_document(trip: &CleanTrip) -> Document {
    doc! {
        "vendor_id": trip.vendor_id,
        "tpep_pickup_datetime": bson::DateTime::from_chrono(trip.tpep_pickup_datetime.and_utc()),
        "tpep_dropoff_datetime": bson::DateTime::from_chrono(trip.tpep_dropoff_datetime.and_utc()),
        "passenger_count": trip.passenger_count,
        "trip_distance": trip.trip_distance,
        "ratecode_id": trip.ratecode_id,
        "store_and_fwd_flag": trip.store_and_fwd_flag.clone(),
        "pu_location_id": trip.pu_location_id,
        "do_location_id": trip.do_location_id,
        "payment_type": trip.payment_type,
        "fare_amount": trip.fare_amount,
        "extra": trip.extra,
        "mta_tax": trip.mta_tax,
        "tip_amount": trip.tip_amount,
        "tolls_amount": trip.tolls_amount,
        "improvement_surcharge": trip.improvement_surcharge,
        "total_amount": trip.total_amount,
        "congestion_surcharge": trip.congestion_surcharge,
        "airport_fee": trip.airport_fee,
    }
}
