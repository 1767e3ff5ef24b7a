//! Boundary synthesis for state series.
//!
//! State values are only reported when they change. To show "this was the
//! value throughout", the window gets a leading point at its start carrying
//! the last value seen before the window (the seed), and a trailing point at
//! its end repeating the last value inside it.
//!
//! When the window holds no samples at all the result is the seed alone,
//! pinned to the window start, with no trailing point.

use crate::value::DataValue;
use crate::window::{Sample, SeriesBatch, VisibleWindow, sort_by_ts};

/// Sort `samples` and add the synthesized boundary points in place.
pub fn merge_state_bounds(samples: &mut Vec<Sample>, seed: Option<&DataValue>, limit: usize, window: VisibleWindow) {
    sort_by_ts(samples);
    let Some(first_ts) = samples.first().map(|s| s.ts) else {
        if let Some(v) = seed {
            samples.push(Sample::new(window.start, v.clone()));
        }
        return;
    };
    if samples.len() < limit
        && first_ts > window.start
        && let Some(v) = seed
    {
        samples.insert(0, Sample::new(window.start, v.clone()));
    }
    if let Some(last) = samples.last()
        && last.ts < window.end
    {
        let trailing = Sample::new(window.end, last.value.clone());
        samples.push(trailing);
    }
}

/// Merge a first-state response into the primary response of a state subscription.
///
/// Each series of `data` is seeded with the first sample of the same series in `first_state`.
/// Series that only appear in `first_state` are not added.
#[must_use]
pub fn merge_state_history(first_state: &SeriesBatch, mut data: SeriesBatch, limit: usize, window: VisibleWindow) -> SeriesBatch {
    for (key, samples) in &mut data {
        let seed = first_state.get(key).and_then(|s| s.first()).map(|s| &s.value);
        merge_state_bounds(samples, seed, limit, window);
    }
    data
}
