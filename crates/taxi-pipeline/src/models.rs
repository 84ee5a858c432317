// Trip record models and pipeline counters
//
// RawTrip mirrors the TLC Yellow Taxi Parquet schema with every field
// optional, because the published files carry nulls in nearly every column.
// CleanTrip is the post-validation shape: required fields are non-optional
// and categorical codes are normalized. Both are transient; they live for
// one chunk only.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One trip row as decoded from a Parquet source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTrip {
    pub vendor_id: Option<i64>,
    pub tpep_pickup_datetime: Option<NaiveDateTime>,
    pub tpep_dropoff_datetime: Option<NaiveDateTime>,
    pub passenger_count: Option<i64>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<i64>,
    pub store_and_fwd_flag: Option<String>,
    pub pu_location_id: Option<i64>,
    pub do_location_id: Option<i64>,
    pub payment_type: Option<i64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
}

/// A trip row that passed every validation rule.
///
/// Required fields are non-optional; surcharge-style amounts stay optional
/// because older files predate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanTrip {
    pub vendor_id: i64,
    pub tpep_pickup_datetime: NaiveDateTime,
    pub tpep_dropoff_datetime: NaiveDateTime,
    pub passenger_count: i64,
    pub trip_distance: f64,
    pub ratecode_id: i64,
    pub store_and_fwd_flag: Option<String>,
    pub pu_location_id: Option<i64>,
    pub do_location_id: Option<i64>,
    pub payment_type: i64,
    pub fare_amount: f64,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
}

/// Per-batch counters returned by the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkResult {
    pub rows_read: u64,
    pub rows_kept: u64,
}

/// Aggregate counters for one clean-and-replace run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineTotals {
    pub chunks: u64,
    pub rows_read: u64,
    pub rows_kept: u64,
    pub documents_inserted: u64,
}

impl PipelineTotals {
    /// Fold one chunk's counters into the running totals.
    pub fn absorb(&mut self, chunk: ChunkResult, documents_inserted: u64) {
        self.chunks += 1;
        self.rows_read += chunk.rows_read;
        self.rows_kept += chunk.rows_kept;
        self.documents_inserted += documents_inserted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_absorb() {
        let mut totals = PipelineTotals::default();
        totals.absorb(
            ChunkResult {
                rows_read: 100,
                rows_kept: 90,
            },
            90,
        );
        totals.absorb(
            ChunkResult {
                rows_read: 50,
                rows_kept: 0,
            },
            0,
        );

        assert_eq!(totals.chunks, 2);
        assert_eq!(totals.rows_read, 150);
        assert_eq!(totals.rows_kept, 90);
        assert_eq!(totals.documents_inserted, 90);
        assert!(totals.rows_kept <= totals.rows_read);
    }
}
