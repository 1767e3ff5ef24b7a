//! Boundary synthesis for state series.

use telemetry_window::state_merge::{merge_state_bounds, merge_state_history};
use telemetry_window::testing::{BatchBuilder, assert_samples_equal};
use telemetry_window::value::DataValue;
use telemetry_window::window::VisibleWindow;


fn window() -> VisibleWindow {
    VisibleWindow { start: 10_000, end: 20_000 }
}

#[test]
fn seed_opens_the_window_and_last_value_closes_it() {
    let mut samples = samples![(15_000, "off")];
    merge_state_bounds(&mut samples, Some(&DataValue::from("on")), 100, window());
    assert_samples_equal(&samples, &samples![(10_000, "on"), (15_000, "off"), (20_000, "off")]);
}

#[test]
fn unsorted_input_is_sorted_first() {
    let mut samples = samples![(18_000, 3.0), (12_000, 2.0)];
    merge_state_bounds(&mut samples, Some(&DataValue::Number(1.0)), 100, window());
    assert_samples_equal(&samples, &samples![(10_000, 1.0), (12_000, 2.0), (18_000, 3.0), (20_000, 3.0)]);
}

#[test]
fn empty_window_yields_the_seed_alone() {
    let mut samples = Vec::new();
    merge_state_bounds(&mut samples, Some(&DataValue::Number(5.0)), 100, window());
    assert_samples_equal(&samples, &samples![(10_000, 5.0)]);

    let mut none = Vec::new();
    merge_state_bounds(&mut none, None, 100, window());
    assert!(none.is_empty());
}

#[test]
fn no_seed_adds_only_the_trailing_point() {
    let mut samples = samples![(15_000, 2.0)];
    merge_state_bounds(&mut samples, None, 100, window());
    assert_samples_equal(&samples, &samples![(15_000, 2.0), (20_000, 2.0)]);
}

#[test]
fn full_window_gets_no_leading_point() {
    let mut samples = samples![(15_000, 2.0), (16_000, 3.0)];
    merge_state_bounds(&mut samples, Some(&DataValue::Number(1.0)), 2, window());
    assert_samples_equal(&samples, &samples![(15_000, 2.0), (16_000, 3.0), (20_000, 3.0)]);
}

#[test]
fn points_on_the_bounds_are_not_duplicated() {
    let mut samples = samples![(10_000, 1.0), (20_000, 2.0)];
    merge_state_bounds(&mut samples, Some(&DataValue::Number(0.0)), 100, window());
    assert_samples_equal(&samples, &samples![(10_000, 1.0), (20_000, 2.0)]);
}

#[test]
fn history_merge_seeds_matching_series_only() {
    let first_state = BatchBuilder::new().sample("state", 1_000, "on").sample("orphan", 2_000, "x").build();
    let data = BatchBuilder::new().sample("state", 15_000, "off").sample("other", 12_000, 4.0).build();

    let out = merge_state_history(&first_state, data, 100, window());

    assert_eq!(out.len(), 2);
    assert!(!out.contains_key("orphan"));
    assert_samples_equal(&out["state"], &samples![(10_000, "on"), (15_000, "off"), (20_000, "off")]);
    assert_samples_equal(&out["other"], &samples![(12_000, 4.0), (20_000, 4.0)]);
}
