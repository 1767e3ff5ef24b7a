//! Assertions over delivered samples.

use crate::window::{Sample, TimestampMs};
use std::fmt::Write as _;

fn render(samples: &[Sample]) -> String {
    let mut out = String::from("[");
    for (i, s) in samples.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "[{}, {}]", s.ts, s.value);
    }
    out.push(']');
    out
}

/// Assert that two sample slices are equal in order and content.
///
/// Numeric values are compared with `f64` equality, except that two `NaN`s are equal.
///
/// # Panics
///
/// Panics if the slices differ in length, timestamps or values.
///
/// # Example
///
/// ```
/// use telemetry_window::testing::assert_samples_equal;
/// use telemetry_window::window::Sample;
///
/// assert_samples_equal(&[Sample::new(1, 2.0)], &[Sample::new(1, 2.0)]);
/// ```
pub fn assert_samples_equal(actual: &[Sample], expected: &[Sample]) {
    let same = actual.len() == expected.len()
        && actual.iter().zip(expected).all(|(a, e)| {
            a.ts == e.ts
                && match (a.value.as_f64(), e.value.as_f64()) {
                    (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                    _ => a.value == e.value,
                }
        });
    assert!(
        same,
        "Sample mismatch:\n  Expected: {}\n  Actual:   {}",
        render(expected),
        render(actual)
    );
}

/// Assert the timestamps of a slice, ignoring values.
///
/// # Panics
///
/// Panics if the timestamps differ.
pub fn assert_timestamps(actual: &[Sample], expected: &[TimestampMs]) {
    let ts: Vec<TimestampMs> = actual.iter().map(|s| s.ts).collect();
    assert_eq!(ts, expected, "Timestamp mismatch for {}", render(actual));
}

/// Assert that timestamps are strictly increasing.
///
/// # Panics
///
/// Panics at the first pair out of order or duplicated.
pub fn assert_strictly_ascending(samples: &[Sample]) {
    for pair in samples.windows(2) {
        assert!(
            pair[0].ts < pair[1].ts,
            "Samples not strictly ascending at {} -> {}: {}",
            pair[0].ts,
            pair[1].ts,
            render(samples)
        );
    }
}
