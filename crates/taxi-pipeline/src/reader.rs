// Chunked Parquet reading
//
// Opens one TLC trip file and yields fixed-size batches of decoded rows,
// never materializing the whole file. Column lookup is by name and
// case-insensitive, and numeric/timestamp columns accept the physical
// types that actually occur across published years (Int32 vs Int64 ids,
// Float64 passenger counts, s/ms/us/ns timestamps).

use crate::models::RawTrip;
use crate::{PipelineError, Result};
use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray,
    RecordBatch, StringArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::datatypes::{DataType, Schema, TimeUnit};
use chrono::{DateTime, NaiveDateTime};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// List the Parquet files in a raw-data directory, lexically sorted for
/// reproducible runs. A missing directory is a valid, empty source set.
pub fn list_parquet_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("parquet"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    Ok(files)
}

/// Positions of the trip columns within one file's schema.
///
/// Required columns are resolved at open time; the rest are optional
/// because the TLC schema has grown columns over the years.
#[derive(Debug, Clone)]
struct ColumnMap {
    pickup: usize,
    dropoff: usize,
    passenger_count: usize,
    trip_distance: usize,
    fare_amount: usize,
    vendor_id: Option<usize>,
    ratecode_id: Option<usize>,
    store_and_fwd_flag: Option<usize>,
    pu_location_id: Option<usize>,
    do_location_id: Option<usize>,
    payment_type: Option<usize>,
    extra: Option<usize>,
    mta_tax: Option<usize>,
    tip_amount: Option<usize>,
    tolls_amount: Option<usize>,
    improvement_surcharge: Option<usize>,
    total_amount: Option<usize>,
    congestion_surcharge: Option<usize>,
    airport_fee: Option<usize>,
}

impl ColumnMap {
    fn try_new(schema: &Schema, path: &Path) -> Result<Self> {
        let find = |name: &str| {
            schema
                .fields()
                .iter()
                .position(|f| f.name().eq_ignore_ascii_case(name))
        };

        let required = |name: &str| {
            find(name).ok_or_else(|| PipelineError::SourceRead {
                path: path.display().to_string(),
                message: format!("missing required column '{}'", name),
            })
        };

        let map = Self {
            pickup: required("tpep_pickup_datetime")?,
            dropoff: required("tpep_dropoff_datetime")?,
            passenger_count: required("passenger_count")?,
            trip_distance: required("trip_distance")?,
            fare_amount: required("fare_amount")?,
            vendor_id: find("VendorID"),
            ratecode_id: find("RatecodeID"),
            store_and_fwd_flag: find("store_and_fwd_flag"),
            pu_location_id: find("PULocationID"),
            do_location_id: find("DOLocationID"),
            payment_type: find("payment_type"),
            extra: find("extra"),
            mta_tax: find("mta_tax"),
            tip_amount: find("tip_amount"),
            tolls_amount: find("tolls_amount"),
            improvement_surcharge: find("improvement_surcharge"),
            total_amount: find("total_amount"),
            congestion_surcharge: find("congestion_surcharge"),
            airport_fee: find("airport_fee"),
        };

        map.check_types(schema, path)?;
        Ok(map)
    }

    /// Reject files whose required columns cannot yield usable values.
    fn check_types(&self, schema: &Schema, path: &Path) -> Result<()> {
        let incompatible = |name: &str, data_type: &DataType| PipelineError::SourceRead {
            path: path.display().to_string(),
            message: format!("column '{}' has incompatible type {}", name, data_type),
        };

        for (idx, name) in [(self.pickup, "tpep_pickup_datetime"), (self.dropoff, "tpep_dropoff_datetime")] {
            let data_type = schema.field(idx).data_type();
            if !matches!(data_type, DataType::Timestamp(_, _)) {
                return Err(incompatible(name, data_type));
            }
        }

        for (idx, name) in [
            (self.passenger_count, "passenger_count"),
            (self.trip_distance, "trip_distance"),
            (self.fare_amount, "fare_amount"),
        ] {
            let data_type = schema.field(idx).data_type();
            if !matches!(
                data_type,
                DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
            ) {
                return Err(incompatible(name, data_type));
            }
        }

        Ok(())
    }
}

/// Lazy, forward-only reader over one Parquet trip file.
///
/// Yields at most `chunk_size` rows per batch in file-storage order;
/// memory use is bounded by the chunk size, not the file size. The
/// sequence is not restartable; reopen the file for a new read.
pub struct TripChunkReader {
    path: PathBuf,
    columns: ColumnMap,
    reader: ParquetRecordBatchReader,
}

impl std::fmt::Debug for TripChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripChunkReader")
            .field("path", &self.path)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl TripChunkReader {
    /// Open a Parquet file for chunked reading.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if chunk_size == 0 {
            return Err(PipelineError::Config(
                "chunk size must be at least 1".to_string(),
            ));
        }

        let file = File::open(&path).map_err(|e| PipelineError::source_read(&path, e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| PipelineError::source_read(&path, e))?;

        let columns = ColumnMap::try_new(builder.schema().as_ref(), &path)?;
        let reader = builder
            .with_batch_size(chunk_size)
            .build()
            .map_err(|e| PipelineError::source_read(&path, e))?;

        debug!(path = %path.display(), chunk_size, "opened parquet source");

        Ok(Self {
            path,
            columns,
            reader,
        })
    }

    fn decode(&self, batch: &RecordBatch) -> Vec<RawTrip> {
        let col = |idx: usize| batch.column(idx);
        let opt_col = |idx: Option<usize>| idx.map(|i| batch.column(i));
        let c = &self.columns;

        (0..batch.num_rows())
            .map(|row| RawTrip {
                vendor_id: opt_col(c.vendor_id).and_then(|a| int_at(a, row)),
                tpep_pickup_datetime: timestamp_at(col(c.pickup), row),
                tpep_dropoff_datetime: timestamp_at(col(c.dropoff), row),
                passenger_count: int_at(col(c.passenger_count), row),
                trip_distance: float_at(col(c.trip_distance), row),
                ratecode_id: opt_col(c.ratecode_id).and_then(|a| int_at(a, row)),
                store_and_fwd_flag: opt_col(c.store_and_fwd_flag).and_then(|a| string_at(a, row)),
                pu_location_id: opt_col(c.pu_location_id).and_then(|a| int_at(a, row)),
                do_location_id: opt_col(c.do_location_id).and_then(|a| int_at(a, row)),
                payment_type: opt_col(c.payment_type).and_then(|a| int_at(a, row)),
                fare_amount: float_at(col(c.fare_amount), row),
                extra: opt_col(c.extra).and_then(|a| float_at(a, row)),
                mta_tax: opt_col(c.mta_tax).and_then(|a| float_at(a, row)),
                tip_amount: opt_col(c.tip_amount).and_then(|a| float_at(a, row)),
                tolls_amount: opt_col(c.tolls_amount).and_then(|a| float_at(a, row)),
                improvement_surcharge: opt_col(c.improvement_surcharge)
                    .and_then(|a| float_at(a, row)),
                total_amount: opt_col(c.total_amount).and_then(|a| float_at(a, row)),
                congestion_surcharge: opt_col(c.congestion_surcharge)
                    .and_then(|a| float_at(a, row)),
                airport_fee: opt_col(c.airport_fee).and_then(|a| float_at(a, row)),
            })
            .collect()
    }
}

impl Iterator for TripChunkReader {
    type Item = Result<Vec<RawTrip>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.next()? {
            Ok(batch) => Some(Ok(self.decode(&batch))),
            Err(e) => Some(Err(PipelineError::source_read(&self.path, e))),
        }
    }
}

// ============================================================================
// Cell extraction
// ============================================================================

fn int_at(col: &ArrayRef, row: usize) -> Option<i64> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Int64 => col.as_any().downcast_ref::<Int64Array>().map(|a| a.value(row)),
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| i64::from(a.value(row))),
        DataType::Float64 => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| a.value(row) as i64),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.value(row) as i64),
        _ => None,
    }
}

fn float_at(col: &ArrayRef, row: usize) -> Option<f64> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Float64 => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| a.value(row)),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| f64::from(a.value(row))),
        DataType::Int64 => col
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(row) as f64),
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| f64::from(a.value(row))),
        _ => None,
    }
}

fn string_at(col: &ArrayRef, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Utf8 => col
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| a.value(row).to_string()),
        DataType::LargeUtf8 => col
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .map(|a| a.value(row).to_string()),
        _ => None,
    }
}

fn timestamp_at(col: &ArrayRef, row: usize) -> Option<NaiveDateTime> {
    if col.is_null(row) {
        return None;
    }
    let DataType::Timestamp(unit, _) = col.data_type() else {
        return None;
    };

    let datetime = match unit {
        TimeUnit::Second => {
            let v = col.as_any().downcast_ref::<TimestampSecondArray>()?.value(row);
            DateTime::from_timestamp(v, 0)
        }
        TimeUnit::Millisecond => {
            let v = col
                .as_any()
                .downcast_ref::<TimestampMillisecondArray>()?
                .value(row);
            DateTime::from_timestamp_millis(v)
        }
        TimeUnit::Microsecond => {
            let v = col
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()?
                .value(row);
            DateTime::from_timestamp_micros(v)
        }
        TimeUnit::Nanosecond => {
            let v = col
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()?
                .value(row);
            DateTime::from_timestamp(v.div_euclid(1_000_000_000), v.rem_euclid(1_000_000_000) as u32)
        }
    };

    datetime.map(|dt| dt.naive_utc())
}
