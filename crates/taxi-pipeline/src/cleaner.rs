// Trip validation and normalization
//
// Pure, per-batch cleaning: a batch of raw rows goes in, the surviving
// rows and counters come out. No IO here, so the rules are trivially
// testable and the output depends only on the input rows. Chunk
// boundaries carry no state, which keeps cleaning results independent
// of the configured chunk size.
//
// Two kinds of rules apply:
// - Range rules DROP the row (impossible timestamps, out-of-range
//   counts, distances, fares, negative amounts).
// - Categorical rules NORMALIZE the value to the dictionary's unknown
//   sentinel and keep the row.

use crate::models::{ChunkResult, CleanTrip, RawTrip};
use tracing::trace;

/// Vendor codes published in the TLC data dictionary.
const KNOWN_VENDOR_IDS: [i64; 4] = [1, 2, 6, 7];
/// Sentinel for a vendor code outside the dictionary.
const UNKNOWN_VENDOR_ID: i64 = 0;
/// Rate codes run 1..=6; 99 is the dictionary's null/unknown code.
const KNOWN_RATECODE_RANGE: std::ops::RangeInclusive<i64> = 1..=6;
const UNKNOWN_RATECODE_ID: i64 = 99;
/// Payment types run 1..=6; 5 is "unknown".
const KNOWN_PAYMENT_RANGE: std::ops::RangeInclusive<i64> = 1..=6;
const UNKNOWN_PAYMENT_TYPE: i64 = 5;

/// Bounds for the range rules. Defaults match the plausibility limits
/// for yellow cab trips within the metro area.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanerConfig {
    pub min_passenger_count: i64,
    pub max_passenger_count: i64,
    pub max_trip_distance: f64,
    pub max_fare_amount: f64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            min_passenger_count: 1,
            max_passenger_count: 8,
            max_trip_distance: 100.0,
            max_fare_amount: 500.0,
        }
    }
}

/// Validate and normalize one batch of raw trips.
///
/// Row order is preserved. Rows failing any range rule are dropped;
/// categorical fields are never grounds for dropping.
pub fn clean_batch(batch: &[RawTrip], config: &CleanerConfig) -> (Vec<CleanTrip>, ChunkResult) {
    let mut kept = Vec::with_capacity(batch.len());

    for trip in batch {
        if let Some(clean) = clean_trip(trip, config) {
            kept.push(clean);
        }
    }

    let result = ChunkResult {
        rows_read: batch.len() as u64,
        rows_kept: kept.len() as u64,
    };
    trace!(rows_read = result.rows_read, rows_kept = result.rows_kept, "cleaned batch");

    (kept, result)
}

fn clean_trip(trip: &RawTrip, config: &CleanerConfig) -> Option<CleanTrip> {
    let pickup = trip.tpep_pickup_datetime?;
    let dropoff = trip.tpep_dropoff_datetime?;
    if dropoff < pickup {
        return None;
    }

    let passenger_count = trip.passenger_count?;
    if passenger_count < config.min_passenger_count
        || passenger_count > config.max_passenger_count
    {
        return None;
    }

    let trip_distance = trip.trip_distance?;
    if !(0.0..=config.max_trip_distance).contains(&trip_distance) {
        return None;
    }

    let fare_amount = trip.fare_amount?;
    if !(0.0..=config.max_fare_amount).contains(&fare_amount) {
        return None;
    }

    // Optional amounts may be absent, but never negative.
    for amount in [trip.tip_amount, trip.tolls_amount, trip.total_amount] {
        if matches!(amount, Some(v) if v < 0.0) {
            return None;
        }
    }

    Some(CleanTrip {
        vendor_id: normalize_vendor(trip.vendor_id),
        tpep_pickup_datetime: pickup,
        tpep_dropoff_datetime: dropoff,
        passenger_count,
        trip_distance,
        ratecode_id: normalize_ratecode(trip.ratecode_id),
        store_and_fwd_flag: normalize_flag(trip.store_and_fwd_flag.as_deref()),
        pu_location_id: trip.pu_location_id,
        do_location_id: trip.do_location_id,
        payment_type: normalize_payment(trip.payment_type),
        fare_amount,
        extra: trip.extra,
        mta_tax: trip.mta_tax,
        tip_amount: trip.tip_amount,
        tolls_amount: trip.tolls_amount,
        improvement_surcharge: trip.improvement_surcharge,
        total_amount: trip.total_amount,
        congestion_surcharge: trip.congestion_surcharge,
        airport_fee: trip.airport_fee,
    })
}

fn normalize_vendor(value: Option<i64>) -> i64 {
    match value {
        Some(v) if KNOWN_VENDOR_IDS.contains(&v) => v,
        _ => UNKNOWN_VENDOR_ID,
    }
}

fn normalize_ratecode(value: Option<i64>) -> i64 {
    match value {
        Some(v) if KNOWN_RATECODE_RANGE.contains(&v) => v,
        _ => UNKNOWN_RATECODE_ID,
    }
}

fn normalize_payment(value: Option<i64>) -> i64 {
    match value {
        Some(v) if KNOWN_PAYMENT_RANGE.contains(&v) => v,
        _ => UNKNOWN_PAYMENT_TYPE,
    }
}

fn normalize_flag(value: Option<&str>) -> Option<String> {
    match value {
        Some("Y") => Some("Y".to_string()),
        Some("N") => Some("N".to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    fn valid_trip() -> RawTrip {
        RawTrip {
            vendor_id: Some(2),
            tpep_pickup_datetime: Some(ts(8, 0)),
            tpep_dropoff_datetime: Some(ts(8, 30)),
            passenger_count: Some(1),
            trip_distance: Some(3.2),
            ratecode_id: Some(1),
            store_and_fwd_flag: Some("N".to_string()),
            pu_location_id: Some(161),
            do_location_id: Some(237),
            payment_type: Some(1),
            fare_amount: Some(18.5),
            extra: Some(1.0),
            mta_tax: Some(0.5),
            tip_amount: Some(4.0),
            tolls_amount: Some(0.0),
            improvement_surcharge: Some(1.0),
            total_amount: Some(25.0),
            congestion_surcharge: Some(2.5),
            airport_fee: None,
        }
    }

    #[test]
    fn test_valid_trip_kept_unchanged() {
        let (kept, result) = clean_batch(&[valid_trip()], &CleanerConfig::default());
        assert_eq!(result.rows_read, 1);
        assert_eq!(result.rows_kept, 1);
        let trip = &kept[0];
        assert_eq!(trip.vendor_id, 2);
        assert_eq!(trip.passenger_count, 1);
        assert_eq!(trip.store_and_fwd_flag.as_deref(), Some("N"));
        assert_eq!(trip.total_amount, Some(25.0));
    }

    #[test]
    fn test_range_rules_drop_rows() {
        let mut missing_pickup = valid_trip();
        missing_pickup.tpep_pickup_datetime = None;

        let mut backwards = valid_trip();
        backwards.tpep_dropoff_datetime = Some(ts(7, 0));

        let mut zero_passengers = valid_trip();
        zero_passengers.passenger_count = Some(0);

        let mut too_many_passengers = valid_trip();
        too_many_passengers.passenger_count = Some(9);

        let mut long_haul = valid_trip();
        long_haul.trip_distance = Some(250.0);

        let mut negative_distance = valid_trip();
        negative_distance.trip_distance = Some(-1.0);

        let mut absurd_fare = valid_trip();
        absurd_fare.fare_amount = Some(700.0);

        let mut negative_tip = valid_trip();
        negative_tip.tip_amount = Some(-2.0);

        let mut negative_total = valid_trip();
        negative_total.total_amount = Some(-10.0);

        let batch = vec![
            missing_pickup,
            backwards,
            zero_passengers,
            too_many_passengers,
            long_haul,
            negative_distance,
            absurd_fare,
            negative_tip,
            negative_total,
        ];
        let (kept, result) = clean_batch(&batch, &CleanerConfig::default());
        assert!(kept.is_empty());
        assert_eq!(result.rows_read, 9);
        assert_eq!(result.rows_kept, 0);
    }

    #[test]
    fn test_boundary_values_kept() {
        let mut boundary = valid_trip();
        boundary.passenger_count = Some(8);
        boundary.trip_distance = Some(100.0);
        boundary.fare_amount = Some(500.0);
        boundary.tpep_dropoff_datetime = boundary.tpep_pickup_datetime;

        let (kept, _) = clean_batch(&[boundary], &CleanerConfig::default());
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_unknown_categoricals_normalized_not_dropped() {
        let mut trip = valid_trip();
        trip.vendor_id = Some(42);
        trip.ratecode_id = Some(17);
        trip.payment_type = Some(0);
        trip.store_and_fwd_flag = Some("maybe".to_string());

        let (kept, result) = clean_batch(&[trip], &CleanerConfig::default());
        assert_eq!(result.rows_kept, 1);
        let trip = &kept[0];
        assert_eq!(trip.vendor_id, UNKNOWN_VENDOR_ID);
        assert_eq!(trip.ratecode_id, UNKNOWN_RATECODE_ID);
        assert_eq!(trip.payment_type, UNKNOWN_PAYMENT_TYPE);
        assert_eq!(trip.store_and_fwd_flag, None);
    }

    #[test]
    fn test_null_categoricals_normalized() {
        let mut trip = valid_trip();
        trip.vendor_id = None;
        trip.ratecode_id = None;
        trip.payment_type = None;
        trip.store_and_fwd_flag = None;

        let (kept, _) = clean_batch(&[trip], &CleanerConfig::default());
        assert_eq!(kept[0].vendor_id, UNKNOWN_VENDOR_ID);
        assert_eq!(kept[0].ratecode_id, UNKNOWN_RATECODE_ID);
        assert_eq!(kept[0].payment_type, UNKNOWN_PAYMENT_TYPE);
        assert_eq!(kept[0].store_and_fwd_flag, None);
    }

    #[test]
    fn test_optional_amounts_may_be_absent() {
        let mut trip = valid_trip();
        trip.tip_amount = None;
        trip.tolls_amount = None;
        trip.total_amount = None;

        let (kept, _) = clean_batch(&[trip], &CleanerConfig::default());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].tip_amount, None);
    }

    #[test]
    fn test_mixed_batch_preserves_order() {
        let mut bad = valid_trip();
        bad.fare_amount = Some(-5.0);

        let mut first = valid_trip();
        first.pu_location_id = Some(1);
        let mut second = valid_trip();
        second.pu_location_id = Some(2);

        let batch = vec![first, bad, second];
        let (kept, result) = clean_batch(&batch, &CleanerConfig::default());
        assert_eq!(result.rows_read, 3);
        assert_eq!(result.rows_kept, 2);
        assert_eq!(kept[0].pu_location_id, Some(1));
        assert_eq!(kept[1].pu_location_id, Some(2));
    }

    #[test]
    fn test_five_row_batch_keeps_three() {
        let mut null_fare = valid_trip();
        null_fare.fare_amount = None;

        let mut backwards = valid_trip();
        backwards.tpep_dropoff_datetime = Some(ts(7, 30));

        let batch = vec![
            valid_trip(),
            valid_trip(),
            null_fare,
            backwards,
            valid_trip(),
        ];
        let (kept, result) = clean_batch(&batch, &CleanerConfig::default());
        assert_eq!(result.rows_read, 5);
        assert_eq!(result.rows_kept, 3);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_chunking_does_not_change_outcome() {
        let mut bad = valid_trip();
        bad.passenger_count = None;
        let rows = vec![valid_trip(), bad, valid_trip(), valid_trip()];
        let config = CleanerConfig::default();

        let (whole, _) = clean_batch(&rows, &config);

        let mut split = Vec::new();
        for chunk in rows.chunks(2) {
            let (kept, _) = clean_batch(chunk, &config);
            split.extend(kept);
        }

        assert_eq!(whole, split);
    }

    #[test]
    fn test_cleaning_is_deterministic() {
        let rows = vec![valid_trip(), valid_trip()];
        let config = CleanerConfig::default();
        let (a, _) = clean_batch(&rows, &config);
        let (b, _) = clean_batch(&rows, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_bounds() {
        let config = CleanerConfig {
            max_passenger_count: 4,
            ..CleanerConfig::default()
        };
        let mut trip = valid_trip();
        trip.passenger_count = Some(5);

        let (kept, _) = clean_batch(&[trip], &config);
        assert!(kept.is_empty());
    }
}
