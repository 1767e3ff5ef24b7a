//! Bucket alignment and window arithmetic.

use telemetry_window::config::{AggregationParams, SubscriptionTimewindow};
use telemetry_window::window::{VisibleWindow, bucket_ts, div_floor};

#[test]
fn bucket_key_is_interval_midpoint() {
    // start 0, 1s buckets: [0, 1000) -> 500, [1000, 2000) -> 1500
    assert_eq!(bucket_ts(0, 0, 1000), 500);
    assert_eq!(bucket_ts(999, 0, 1000), 500);
    assert_eq!(bucket_ts(1000, 0, 1000), 1500);
    assert_eq!(bucket_ts(1999, 0, 1000), 1500);
}

#[test]
fn bucket_alignment_is_relative_to_window_start() {
    // start 250 shifts every boundary by 250
    assert_eq!(bucket_ts(300, 250, 1000), 750);
    assert_eq!(bucket_ts(1249, 250, 1000), 750);
    assert_eq!(bucket_ts(1250, 250, 1000), 1750);
}

#[test]
fn samples_before_start_floor_downwards() {
    assert_eq!(div_floor(-1, 1000), -1);
    assert_eq!(div_floor(-1000, 1000), -1);
    assert_eq!(div_floor(-1001, 1000), -2);
    assert_eq!(bucket_ts(900, 1000, 1000), 500);
}

#[test]
fn odd_interval_midpoint_truncates() {
    assert_eq!(bucket_ts(0, 0, 5), 2);
    assert_eq!(bucket_ts(7, 0, 5), 7);
}

#[test]
fn visible_window_is_open_at_start() {
    let w = VisibleWindow::new(1000, 5000);
    assert_eq!(w.end, 6000);
    assert!(!w.contains(1000));
    assert!(w.contains(1001));
    assert!(w.contains(6000));
    assert!(!w.contains(6001));
}

#[test]
fn window_slides_by_whole_intervals() {
    let mut w = VisibleWindow::new(0, 10_000);
    w.slide(3, 1000);
    assert_eq!(w, VisibleWindow { start: 3000, end: 13_000 });
}

#[test]
fn realtime_timewindow_aligns_start_and_applies_clock_skew() {
    let agg = AggregationParams { interval: 1000, ..Default::default() };
    // server now = 10_300 + 200 = 10_500; start 5500 aligns down to 5000
    let tw = SubscriptionTimewindow::realtime(10_300, 200, 5000, agg);
    assert_eq!(tw.start_ts, 5000);
    assert_eq!(tw.aggregation.time_window, 6000);
    assert_eq!(tw.realtime_window_ms, Some(5000));
    assert!(tw.is_realtime());
    assert!(!tw.is_history());
}

#[test]
fn aligned_realtime_timewindow_keeps_its_width() {
    let agg = AggregationParams { interval: 1000, ..Default::default() };
    let tw = SubscriptionTimewindow::realtime(60_000, 0, 10_000, agg);
    assert_eq!(tw.start_ts, 50_000);
    assert_eq!(tw.aggregation.time_window, 10_000);
    assert_eq!(tw.visible_window(), VisibleWindow { start: 50_000, end: 60_000 });
}

#[test]
fn history_timewindow_spans_the_fixed_range() {
    let tw = SubscriptionTimewindow::history(1000, 4000, AggregationParams::default());
    assert!(tw.is_history());
    assert_eq!(tw.aggregation.time_window, 3000);
    assert_eq!(tw.start_ts, 1000);
}
