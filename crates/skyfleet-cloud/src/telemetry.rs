//! Unified telemetry aggregation
//!
//! Providers report metrics in different units and granularities
//! (CloudWatch percent at 300s, GCP ratios at 60s, Azure bytes at
//! arbitrary intervals). This module reconciles them into one schema:
//! fixed 5-minute buckets, average statistic, percent for CPU/RAM and
//! gigabytes for storage-shaped values.
//!
//! "No data" is not a failure: an empty or gappy range comes back as a
//! series with `partial: true`, while a failed call never reaches this
//! module at all (it surfaces as `Err` upstream). A capability the
//! provider lacks is an `Unsupported` error raised by the adapter,
//! never an empty series.

use crate::model::{MetricKind, MetricSample, MetricUnit, TimeRange};
use chrono::Duration as ChronoDuration;
use serde::Serialize;

/// Width of one aggregation bucket
pub const BUCKET_SECONDS: i64 = 300;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Normalized result of one telemetry query
#[derive(Debug, Clone, Serialize)]
pub struct MetricSeries {
    pub kind: MetricKind,

    /// Canonical unit of every sample in the series
    pub unit: MetricUnit,

    /// One averaged sample per bucket that had data, ordered by time
    pub samples: Vec<MetricSample>,

    /// True when some bucket in the requested range produced no data.
    /// Distinguishes "the provider had nothing to say" from a full
    /// series, and from a failed call, which is an `Err` instead.
    pub partial: bool,
}

impl MetricSeries {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert a raw provider value into the canonical unit for its family
fn to_canonical(value: f64, unit: MetricUnit) -> (f64, MetricUnit) {
    match unit {
        MetricUnit::Percent => (value, MetricUnit::Percent),
        MetricUnit::Ratio => (value * 100.0, MetricUnit::Percent),
        MetricUnit::Bytes => (value / BYTES_PER_GB, MetricUnit::Gigabytes),
        MetricUnit::Gigabytes => (value, MetricUnit::Gigabytes),
    }
}

/// Default canonical unit when a range produced no samples at all
fn default_unit(kind: MetricKind) -> MetricUnit {
    match kind {
        MetricKind::Cpu | MetricKind::Ram => MetricUnit::Percent,
        MetricKind::Storage => MetricUnit::Gigabytes,
    }
}

/// Normalize raw adapter samples into fixed 5-minute average buckets.
///
/// Buckets are aligned to `range.start`; samples outside the range are
/// dropped. Buckets without data produce no sample (the series never
/// invents values) and flip `partial` on.
pub fn aggregate(kind: MetricKind, range: &TimeRange, raw: Vec<MetricSample>) -> MetricSeries {
    let total_seconds = range.duration().num_seconds().max(0);
    let bucket_count = ((total_seconds + BUCKET_SECONDS - 1) / BUCKET_SECONDS) as usize;

    let mut sums: Vec<f64> = vec![0.0; bucket_count];
    let mut counts: Vec<u32> = vec![0; bucket_count];
    let mut unit = None;

    for sample in raw {
        if sample.timestamp < range.start || sample.timestamp >= range.end {
            continue;
        }
        let offset = (sample.timestamp - range.start).num_seconds();
        let idx = (offset / BUCKET_SECONDS) as usize;
        if idx >= bucket_count {
            continue;
        }
        let (value, canonical) = to_canonical(sample.value, sample.unit);
        sums[idx] += value;
        counts[idx] += 1;
        unit.get_or_insert(canonical);
    }

    let unit = unit.unwrap_or_else(|| default_unit(kind));
    let mut samples = Vec::new();
    for idx in 0..bucket_count {
        if counts[idx] == 0 {
            continue;
        }
        samples.push(MetricSample {
            timestamp: range.start + ChronoDuration::seconds(idx as i64 * BUCKET_SECONDS),
            kind,
            value: sums[idx] / counts[idx] as f64,
            unit,
        });
    }

    let partial = samples.len() < bucket_count;
    MetricSeries {
        kind,
        unit,
        samples,
        partial,
    }
}
