//! Bucket reducers.

use telemetry_window::config::AggregationType;
use telemetry_window::reducer::{AggregationMap, Bucket, fold, prepare};
use telemetry_window::value::DataValue;


fn reduce(mode: AggregationType, values: &[f64]) -> f64 {
    let mut it = values.iter().map(|v| DataValue::Number(*v));
    let first = it.next().expect("non-empty input");
    it.fold(Bucket::seed(mode, first), fold).agg_value().to_number()
}

#[test]
fn every_mode_reduces_the_same_input() {
    let values = [1.0, 2.0, 3.0, 4.0];
    assert_approx_eq!(reduce(AggregationType::Avg, &values), 2.5);
    assert_approx_eq!(reduce(AggregationType::Sum, &values), 10.0);
    assert_approx_eq!(reduce(AggregationType::Min, &values), 1.0);
    assert_approx_eq!(reduce(AggregationType::Max, &values), 4.0);
    assert_approx_eq!(reduce(AggregationType::Count, &values), 4.0);
    assert_approx_eq!(reduce(AggregationType::None, &values), 4.0);
}

#[test]
fn single_sample_buckets() {
    assert_approx_eq!(reduce(AggregationType::Avg, &[7.5]), 7.5);
    assert_approx_eq!(reduce(AggregationType::Count, &[7.5]), 1.0);
}

#[test]
fn nan_poisons_arithmetic_buckets() {
    let values = [1.0, f64::NAN, 3.0];
    for mode in [AggregationType::Avg, AggregationType::Sum, AggregationType::Min, AggregationType::Max] {
        assert!(reduce(mode, &values).is_nan(), "{mode} should keep NaN");
    }
    assert_approx_eq!(reduce(AggregationType::Count, &values), 3.0);
}

#[test]
fn prepare_coerces_only_when_aggregating() {
    assert_eq!(prepare(AggregationType::Sum, &DataValue::from("2.5")), DataValue::Number(2.5));
    assert!(prepare(AggregationType::Sum, &DataValue::from("on")).to_number().is_nan());
    assert_eq!(prepare(AggregationType::None, &DataValue::from("on")), DataValue::from("on"));
}

#[test]
fn map_folds_into_existing_buckets() {
    let mut map = AggregationMap::new();
    map.fold_value("t", 500, AggregationType::Sum, DataValue::Number(1.0));
    map.fold_value("t", 500, AggregationType::Sum, DataValue::Number(2.0));
    map.fold_value("t", 1500, AggregationType::Sum, DataValue::Number(5.0));
    map.ensure_series("h");

    assert_eq!(map.bucket_count(), 2);
    let t = map.series("t").expect("series present");
    assert_eq!(t[&500].agg_value(), DataValue::Number(3.0));
    assert!(map.series("h").expect("series present").is_empty());

    map.clear();
    assert_eq!(map.bucket_count(), 0);
}

#[test]
fn server_aggregates_fold_on_duplicate_timestamps() {
    let mut map = AggregationMap::new();
    map.insert_aggregate("t", 500, AggregationType::Count, DataValue::Number(4.0));
    map.insert_aggregate("t", 500, AggregationType::Count, DataValue::Number(9.0));
    assert_eq!(map.series("t").expect("series present")[&500], Bucket::Count(5.0));
}
