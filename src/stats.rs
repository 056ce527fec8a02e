// Copyright 2025 Flowsentry Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Sliding mean, EWMA, pooled variance, median/MAD rolling stats, Shannon
//! entropy and the seasonal bucketed baseline. Population variance/std-dev
//! is used everywhere (never sample variance) so detector behaviours stay
//! comparable with one another.

/// Arithmetic mean. Panics-free: returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn pvariance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn pstdev(values: &[f64]) -> f64 {
    pvariance(values).sqrt()
}

/// Median of a slice (does not mutate the caller's copy).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation (unscaled).
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// `1.4826 * MAD` approximates `sigma` for normal data.
pub const MAD_SCALE: f64 = 1.4826;

/// Mean/std pair, with the MAD-based sigma as a fallback when the
/// population std-dev collapses to zero (e.g. a constant window).
pub fn rolling_stats(values: &[f64]) -> (f64, f64) {
    if values.len() < 2 {
        return (values.first().copied().unwrap_or(0.0), 0.0);
    }
    let m = mean(values);
    let mut std = pstdev(values);
    if std == 0.0 {
        std = MAD_SCALE * mad(values);
    }
    (m, std)
}

/// Median/MAD-scale pair, used by the `"mad"` detector algorithm.
pub fn rolling_stats_mad(values: &[f64]) -> (f64, f64) {
    let med = median(values);
    let m = mad(values);
    if m <= 1e-9 {
        (med, 0.0)
    } else {
        (med, MAD_SCALE * m)
    }
}

/// Exponentially weighted moving average; the first output equals the
/// first input so the series never starts from an artificial baseline.
pub fn ewma(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut estimate = match values.first() {
        Some(v) => *v,
        None => return out,
    };
    out.push(estimate);
    for value in &values[1..] {
        estimate = alpha * value + (1.0 - alpha) * estimate;
        out.push(estimate);
    }
    out
}

/// Trailing mean over a window that *includes* the current index, used to
/// produce the reported baseline series (distinct from the exclusive
/// window used when scoring anomalies).
pub fn sliding_baseline(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for idx in 0..values.len() {
        let start = idx.saturating_sub(window.saturating_sub(1));
        let slice = &values[start..=idx];
        out.push(mean(slice));
    }
    out
}

/// Median of strictly-positive consecutive differences, floored at
/// `floor`. Used by the baseline detector's sample-interval estimate.
pub fn median_diff_floor(times: &[f64], floor: f64) -> f64 {
    if times.len() < 2 {
        return floor;
    }
    let diffs: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    floor.max(median(&diffs))
}

/// Median of strictly-positive consecutive differences, or `0.0` when none
/// exist. Used by the auxiliary detectors to decide whether the series has
/// a usable cadence at all.
pub fn estimate_positive_interval(times: &[f64]) -> f64 {
    if times.len() < 2 {
        return 0.0;
    }
    let diffs: Vec<f64> = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .collect();
    if diffs.is_empty() {
        0.0
    } else {
        median(&diffs)
    }
}

/// Base-2 Shannon entropy. Zero-weight bins are skipped; an all-zero or
/// empty input has zero entropy.
pub fn shannon_entropy_base2(values: &[f64]) -> f64 {
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for value in values {
        if *value <= 0.0 {
            continue;
        }
        let probability = value / total;
        entropy -= probability * probability.log2();
    }
    entropy
}

/// Humanizes a byte count using base-1024 units, one decimal place.
pub fn format_bytes(value: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value <= 0.0 {
        return "0 B".to_string();
    }
    let mut value = value;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{:.1} {}", value, UNITS[idx])
}

/// Seasonal baseline: per-bucket mean (bucket = index modulo `period_steps`)
/// broadcast back over the series, plus the residuals against it.
pub fn seasonal_baseline(series: &[f64], period_steps: usize) -> (Vec<f64>, Vec<f64>) {
    if period_steps <= 1 || series.len() < period_steps {
        let residuals = vec![0.0; series.len()];
        return (series.to_vec(), residuals);
    }
    let mut sums = vec![0.0; period_steps];
    let mut counts = vec![0usize; period_steps];
    for (idx, value) in series.iter().enumerate() {
        let bucket = idx % period_steps;
        sums[bucket] += value;
        counts[bucket] += 1;
    }
    let means: Vec<f64> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0.0 })
        .collect();
    let baseline: Vec<f64> = (0..series.len()).map(|idx| means[idx % period_steps]).collect();
    let residuals: Vec<f64> = series
        .iter()
        .zip(baseline.iter())
        .map(|(v, b)| v - b)
        .collect();
    (baseline, residuals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pvariance_of_constant_series_is_zero() {
        assert_eq!(pvariance(&[5.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn mad_fallback_kicks_in_when_std_is_zero() {
        let (m, s) = rolling_stats(&[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(m, 10.0);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn ewma_first_value_passes_through() {
        let out = ewma(&[4.0, 8.0, 8.0], 0.5);
        assert_eq!(out[0], 4.0);
        assert_eq!(out[1], 6.0);
    }

    #[test]
    fn format_bytes_humanizes() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(512.0), "512.0 B");
        assert_eq!(format_bytes(2048.0), "2.0 KB");
        assert_eq!(format_bytes(1024.0 * 1024.0 * 3.0), "3.0 MB");
    }

    #[test]
    fn entropy_of_uniform_distribution() {
        let e = shannon_entropy_base2(&[1.0, 1.0, 1.0, 1.0]);
        assert!((e - 2.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_skips_non_positive_bins() {
        let e = shannon_entropy_base2(&[4.0, 0.0, -1.0, 4.0]);
        assert!((e - 1.0).abs() < 1e-9);
    }
}
