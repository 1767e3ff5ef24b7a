//! Windowed aggregator: alignment, truncation, sliding, snapshots and lifecycle.

use std::cell::RefCell;
use std::rc::Rc;
use telemetry_window::aggregator::{AggregatorOptions, DataAggregator, UpdateKind};
use telemetry_window::config::AggregationType;
use telemetry_window::error::ConfigError;
use telemetry_window::metrics::{MetricsCollector, names};
use telemetry_window::scheduler::ManualScheduler;
use telemetry_window::testing::{BatchBuilder, assert_samples_equal, assert_strictly_ascending};
use telemetry_window::window::{Sample, SeriesBatch, VisibleWindow};


type Seen = Rc<RefCell<Vec<(SeriesBatch, bool)>>>;

fn options(agg_type: AggregationType, limit: usize) -> AggregatorOptions {
    AggregatorOptions {
        keys: vec!["t".into()],
        start_ts: 0,
        limit,
        agg_type,
        time_window: 10_000,
        interval: 1000,
        state_data: false,
    }
}

fn aggregator(scheduler: &Rc<ManualScheduler>, opts: AggregatorOptions) -> (DataAggregator, Seen) {
    let seen: Seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let agg = DataAggregator::new(
        opts,
        Rc::new(move |data: &SeriesBatch, apply: bool| sink.borrow_mut().push((data.clone(), apply))),
        scheduler.clone(),
    )
    .expect("valid options");
    (agg, seen)
}

fn last_series(seen: &Seen, key: &str) -> Vec<Sample> {
    seen.borrow().last().expect("at least one delivery").0[key].clone()
}

#[test]
fn samples_fold_into_interval_midpoints() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    let batch = BatchBuilder::new().sample("t", 100, 1.0).sample("t", 900, 3.0).sample("t", 1999, 5.0).build();
    agg.on_data(&batch, UpdateKind::Append, false, true);

    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].1);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(500, 2.0), (1500, 5.0)]);
}

#[test]
fn no_aggregation_keeps_raw_timestamps() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::None, 100));

    let batch = BatchBuilder::new().sample("t", 100, 1.0).sample("t", 1999, 3.0).build();
    agg.on_data(&batch, UpdateKind::Append, false, true);

    assert_samples_equal(&last_series(&seen, "t"), &samples![(100, 1.0), (1999, 3.0)]);
}

#[test]
fn oldest_rows_are_dropped_beyond_limit() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Max, 3));

    let batch = BatchBuilder::new().generated("t", 0, 1000, 5, |ts| (ts / 1000).into()).build();
    agg.on_data(&batch, UpdateKind::Append, false, true);

    assert_samples_equal(&last_series(&seen, "t"), &samples![(2500, 2.0), (3500, 3.0), (4500, 4.0)]);
}

#[test]
fn series_without_samples_are_emitted_empty() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let mut opts = options(AggregationType::Sum, 100);
    opts.keys = vec!["t".into(), "h".into()];
    let (agg, seen) = aggregator(&scheduler, opts);

    agg.on_data(&BatchBuilder::new().sample("t", 100, 1.0).sample("other", 100, 9.0).build(), UpdateKind::Append, false, true);

    let out = seen.borrow().last().expect("delivered").0.clone();
    assert_eq!(out.len(), 2);
    assert!(out["h"].is_empty());
    assert!(!out.contains_key("other"));
}

#[test]
fn snapshot_replaces_buckets_and_is_idempotent() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 700, 9.0).build(), UpdateKind::Append, false, true);
    let snapshot = BatchBuilder::new().sample("t", 500, 2.0).sample("t", 1500, 4.0).build();
    agg.on_data(&snapshot, UpdateKind::Snapshot, false, true);
    agg.on_data(&snapshot, UpdateKind::Snapshot, false, true);

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert_samples_equal(&seen[1].0["t"], &samples![(500, 2.0), (1500, 4.0)]);
    assert_eq!(seen[1], seen[2]);
}

#[test]
fn count_snapshot_takes_value_as_count() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Count, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 500, 7.0).build(), UpdateKind::Snapshot, false, true);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(500, 7.0)]);

    agg.on_data(&BatchBuilder::new().sample("t", 600, 1.0).build(), UpdateKind::Append, true, true);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(500, 8.0)]);
}

const FOLDING_MODES: [(AggregationType, [f64; 2]); 5] = [
    (AggregationType::Min, [1.0, 3.0]),
    (AggregationType::Max, [3.0, 5.0]),
    (AggregationType::Avg, [2.0, 4.0]),
    (AggregationType::Sum, [4.0, 8.0]),
    (AggregationType::Count, [2.0, 2.0]),
];

/// Two halves of one batch, spread over the buckets at 5500 and 6500.
fn split_batches() -> (SeriesBatch, SeriesBatch, SeriesBatch) {
    let a = BatchBuilder::new().sample("t", 5100, 1.0).sample("t", 6100, 3.0).build();
    let b = BatchBuilder::new().sample("t", 5200, 3.0).sample("t", 6900, 5.0).build();
    let ab = BatchBuilder::new().samples("t", a["t"].clone()).samples("t", b["t"].clone()).build();
    (a, b, ab)
}

#[test]
fn historical_appends_fold_like_one_batch() {
    let (a, b, ab) = split_batches();
    for (mode, [first, second]) in FOLDING_MODES {
        let scheduler = Rc::new(ManualScheduler::new(10_000));
        let (split, split_seen) = aggregator(&scheduler, options(mode, 100));
        let (whole, whole_seen) = aggregator(&scheduler, options(mode, 100));

        split.on_data(&a, UpdateKind::Append, true, true);
        split.on_data(&b, UpdateKind::Append, true, true);
        whole.on_data(&ab, UpdateKind::Append, true, true);

        assert_eq!(split_seen.borrow().len(), 2, "{mode}");
        assert_samples_equal(&last_series(&split_seen, "t"), &last_series(&whole_seen, "t"));
        assert_samples_equal(&last_series(&whole_seen, "t"), &samples![(5500, first), (6500, second)]);
        assert_eq!(scheduler.pending(), 0, "{mode}");
    }
}

#[test]
fn realtime_appends_fold_like_one_batch() {
    let (a, b, ab) = split_batches();
    for (mode, [first, second]) in FOLDING_MODES {
        let scheduler = Rc::new(ManualScheduler::new(10_000));
        let (split, split_seen) = aggregator(&scheduler, options(mode, 100));
        let (whole, whole_seen) = aggregator(&scheduler, options(mode, 100));

        split.on_data(&a, UpdateKind::Append, false, true);
        split.on_data(&b, UpdateKind::Append, false, true);
        whole.on_data(&ab, UpdateKind::Append, false, true);
        assert_eq!(split_seen.borrow().len(), 1, "{mode}: second append waits for the tick");

        scheduler.advance(1000);

        assert_eq!(split_seen.borrow().len(), 2, "{mode}");
        assert_eq!(whole_seen.borrow().len(), 2, "{mode}");
        assert_samples_equal(&last_series(&split_seen, "t"), &last_series(&whole_seen, "t"));
        assert_samples_equal(&last_series(&whole_seen, "t"), &samples![(5500, first), (6500, second)]);
    }
}

#[test]
fn no_aggregation_last_value_wins() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::None, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 100, "a").build(), UpdateKind::Append, true, true);
    agg.on_data(&BatchBuilder::new().sample("t", 100, "b").build(), UpdateKind::Append, true, true);

    assert_samples_equal(&last_series(&seen, "t"), &samples![(100, "b")]);
}

#[test]
fn window_slides_on_tick_and_drops_expired_buckets() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 500, 1.0).sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(500, 1.0), (9500, 2.0)]);
    assert!(agg.has_pending_tick());

    scheduler.advance(1000);

    assert_eq!(seen.borrow().len(), 2);
    assert!(!seen.borrow()[1].1, "ticks are not applied");
    assert_eq!(agg.window(), VisibleWindow { start: 1000, end: 11_000 });
    assert_samples_equal(&last_series(&seen, "t"), &samples![(9500, 2.0)]);
}

#[test]
fn appends_between_ticks_are_delivered_on_the_next_tick() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);
    agg.on_data(&BatchBuilder::new().sample("t", 9600, 4.0).build(), UpdateKind::Append, false, true);
    assert_eq!(seen.borrow().len(), 1);

    scheduler.advance(1000);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(9500, 3.0)]);
}

#[test]
fn idle_ticks_keep_sliding_in_whole_intervals() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 2500, 1.0).build(), UpdateKind::Append, false, true);
    scheduler.advance(3500);

    assert_eq!(seen.borrow().len(), 4);
    assert_eq!(agg.window(), VisibleWindow { start: 3000, end: 13_000 });
    assert!(last_series(&seen, "t").is_empty());
}

#[test]
fn reset_rebuilds_from_scratch_on_next_batch() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 500, 1.0).sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);
    agg.reset(10_000, 10_000, 1000).expect("valid reset");

    assert!(agg.is_reset_pending());
    assert_eq!(agg.window(), VisibleWindow { start: 10_000, end: 20_000 });

    agg.on_data(&BatchBuilder::new().sample("t", 10_500, 7.0).build(), UpdateKind::Append, false, true);
    assert!(!agg.is_reset_pending());
    assert_eq!(agg.bucket_count(), 1);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(10_500, 7.0)]);
}

#[test]
fn reset_rejects_invalid_interval() {
    let scheduler = Rc::new(ManualScheduler::new(0));
    let (agg, _seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));
    assert_eq!(agg.reset(0, 1000, 0), Err(ConfigError::InvalidInterval { interval: 0 }));
    assert_eq!(agg.reset(0, -1, 1000), Err(ConfigError::InvalidTimeWindow { window: -1 }));
}

#[test]
fn destroy_stops_all_callbacks() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);
    agg.destroy();
    scheduler.advance(5000);
    agg.on_data(&BatchBuilder::new().sample("t", 9700, 2.0).build(), UpdateKind::Snapshot, false, true);

    assert_eq!(seen.borrow().len(), 1);
    assert!(!agg.has_pending_tick());
    assert_eq!(agg.bucket_count(), 0);
}

#[test]
fn dropping_cancels_the_pending_tick() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, _seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));

    agg.on_data(&BatchBuilder::new().sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);
    assert_eq!(scheduler.pending(), 1);
    drop(agg);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn replaced_callback_receives_later_windows() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));
    agg.on_data(&BatchBuilder::new().sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);

    let replacement: Seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&replacement);
    let _old = agg.update_on_data_cb(Rc::new(move |data: &SeriesBatch, apply: bool| {
        sink.borrow_mut().push((data.clone(), apply));
    }));
    scheduler.advance(1000);

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(replacement.borrow().len(), 1);
}

#[test]
fn non_numeric_values_aggregate_to_nan_and_are_counted() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let metrics = MetricsCollector::new();
    let (agg, seen) = aggregator(&scheduler, options(AggregationType::Avg, 100));
    let agg = agg.with_metrics(metrics.clone());

    agg.on_data(&BatchBuilder::new().sample("t", 100, "abc").sample("t", 200, 4.0).build(), UpdateKind::Append, false, true);

    assert_samples_equal(&last_series(&seen, "t"), &[Sample::new(500, f64::NAN)]);
    assert_eq!(metrics.counter(names::NAN_COERCIONS), 1);
    assert_eq!(metrics.counter(names::AGGREGATOR_DELIVERIES), 1);
}

#[test]
fn invalid_options_are_rejected() {
    let scheduler = Rc::new(ManualScheduler::new(0));
    let noop = || -> telemetry_window::aggregator::DataCallback { Rc::new(|_: &SeriesBatch, _: bool| {}) };

    let mut opts = options(AggregationType::Avg, 100);
    opts.interval = 0;
    assert_eq!(DataAggregator::new(opts, noop(), scheduler.clone()).err(), Some(ConfigError::InvalidInterval { interval: 0 }));

    let opts = options(AggregationType::Avg, 0);
    assert_eq!(DataAggregator::new(opts, noop(), scheduler.clone()).err(), Some(ConfigError::InvalidLimit { limit: 0 }));

    let mut opts = options(AggregationType::Avg, 100);
    opts.time_window = -5;
    assert_eq!(DataAggregator::new(opts, noop(), scheduler.clone()).err(), Some(ConfigError::InvalidTimeWindow { window: -5 }));
}

#[test]
fn state_data_gets_boundary_points_that_follow_the_window() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let mut opts = options(AggregationType::None, 100);
    opts.state_data = true;
    let (agg, seen) = aggregator(&scheduler, opts);

    agg.on_data(&BatchBuilder::new().sample("t", 0, 1.0).sample("t", 4000, 2.0).build(), UpdateKind::Snapshot, false, true);
    assert_samples_equal(&last_series(&seen, "t"), &samples![(0, 1.0), (4000, 2.0), (10_000, 2.0)]);

    scheduler.advance(1000);
    let out = last_series(&seen, "t");
    assert_samples_equal(&out, &samples![(1000, 1.0), (4000, 2.0), (11_000, 2.0)]);
    assert_strictly_ascending(&out);
}

#[test]
fn timeout_never_drops_below_one_second() {
    let scheduler = Rc::new(ManualScheduler::new(10_000));
    let mut opts = options(AggregationType::Avg, 100);
    opts.interval = 200;
    let (agg, _seen) = aggregator(&scheduler, opts);

    agg.on_data(&BatchBuilder::new().sample("t", 9500, 2.0).build(), UpdateKind::Append, false, true);
    assert_eq!(scheduler.next_due(), Some(11_000));
    assert_eq!(agg.interval(), 200);
}
