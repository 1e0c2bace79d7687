//! Uniform-grid resampling
//!
//! Wearables report heart rate at irregular intervals (1s, 5s, 10s, 15s gaps
//! are all common). This module interpolates such readings onto a fixed grid
//! starting at the first sample:
//! - offsets are normalized so the first sample sits at 0
//! - interior grid points are linearly interpolated between neighbours
//! - values are rounded to whole beats

use crate::types::{ResampledSeries, TimeSample};
use tracing::warn;

/// Largest grid the resampler will build; longer grids give an empty series
pub const MAX_GRID_POINTS: usize = 1_000_000;

/// Resampler for converting irregular samples to a fixed-interval series
pub struct Resampler;

impl Resampler {
    /// Resample `samples` onto a grid of `step_seconds`.
    ///
    /// The grid covers `[0, last - first]` inclusive, so the output has
    /// `floor((last - first) / step) + 1` points. Empty input gives an empty
    /// series. A non-positive or non-finite step also gives an empty series, as
    /// does a grid longer than [`MAX_GRID_POINTS`].
    pub fn resample(samples: &[TimeSample], step_seconds: f64) -> ResampledSeries {
        if samples.is_empty() || !(step_seconds.is_finite() && step_seconds > 0.0) {
            return ResampledSeries::empty(step_seconds);
        }

        let points = normalize_offsets(samples);
        let total_duration = points[points.len() - 1].offset_seconds;
        let span = (total_duration / step_seconds).floor();
        if !span.is_finite() || span >= MAX_GRID_POINTS as f64 {
            warn!(total_duration, step_seconds, "resample grid too large, discarding");
            return ResampledSeries::empty(step_seconds);
        }
        let grid_len = span as usize + 1;

        let values = (0..grid_len)
            .map(|i| value_at(&points, i as f64 * step_seconds).round())
            .collect();

        ResampledSeries {
            step_seconds,
            values,
        }
    }
}

/// Sort by offset and shift so the earliest sample is at offset 0
fn normalize_offsets(samples: &[TimeSample]) -> Vec<TimeSample> {
    let mut points = samples.to_vec();
    points.sort_by(|a, b| a.offset_seconds.total_cmp(&b.offset_seconds));

    let origin = points[0].offset_seconds;
    for point in &mut points {
        point.offset_seconds -= origin;
    }
    points
}

/// Interpolated value at grid offset `t`; `points` must be sorted and non-empty
fn value_at(points: &[TimeSample], t: f64) -> f64 {
    // last sample with offset <= t
    let before = points
        .partition_point(|p| p.offset_seconds <= t)
        .checked_sub(1)
        .map(|i| points[i]);
    // first sample with offset >= t
    let after = points.get(points.partition_point(|p| p.offset_seconds < t)).copied();

    match (before, after) {
        (Some(b), Some(a)) if a.offset_seconds != b.offset_seconds => {
            let ratio = (t - b.offset_seconds) / (a.offset_seconds - b.offset_seconds);
            b.value + ratio * (a.value - b.value)
        }
        (Some(b), _) => b.value,
        (None, Some(a)) => a.value,
        // unreachable for non-empty input
        (None, None) => 0.0,
    }
}
