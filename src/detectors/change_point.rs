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

//! Paired-window mean-shift detection: slide a center index, compare the
//! means of the windows immediately before and after it against their
//! pooled standard deviation, with a refractory gap between emissions.

use super::{Detector, DetectorInput};
use crate::context::{PartialResult, PipelineContext};
use crate::error::DetectorError;
use crate::model::{ChangeDirection, ChangePoint, ChangePointDiagnostics};
use crate::stats;
use crate::timestamp::Timestamp;

pub struct ChangePointDetector;

impl ChangePointDetector {
    pub fn new() -> Self {
        ChangePointDetector
    }
}

impl Default for ChangePointDetector {
    fn default() -> Self {
        Self::new()
    }
}

const CORE_METRICS: [&str; 3] = ["bytesPerSecond", "packetsPerSecond", "flowsPerSecond"];

impl Detector for ChangePointDetector {
    fn id(&self) -> &'static str {
        "changepoint"
    }

    fn run(
        &self,
        input: &DetectorInput,
        ctx: &mut PipelineContext,
    ) -> Result<PartialResult, DetectorError> {
        let min_samples = input.setting_usize("minSamples", 180);
        if input.samples.len() < min_samples {
            ctx.add_score(self.id(), 0.0, Some("changepoint"), &["changepoint.insufficient-data".to_string()]);
            return Ok(PartialResult::ChangePoints {
                points: vec![],
                diagnostics: ChangePointDiagnostics {
                    reasons: vec!["changepoint.insufficient-data".to_string()],
                },
            });
        }

        let times: Vec<f64> = input.samples.iter().map(|s| s.timestamp.as_seconds()).collect();
        let sample_interval = stats::median_diff_floor(&times, 1.0);
        let window_seconds = input.setting_f64("windowSeconds", input.params.window_seconds);
        let window_steps = ((window_seconds / sample_interval).round() as i64).max(2) as usize;
        let min_gap_seconds = input.setting_f64("minGapSeconds", 45.0);
        let min_gap_steps = ((min_gap_seconds / sample_interval).round() as i64).max(1) as usize;
        let threshold = input.setting_f64("thresholdStdDevs", 2.0);

        let mut points = Vec::new();
        let mut peak_abs_score = 0.0f64;

        for metric in CORE_METRICS {
            let values: Vec<f64> = input
                .samples
                .iter()
                .map(|s| match metric {
                    "bytesPerSecond" => s.bytes_per_second,
                    "packetsPerSecond" => s.packets_per_second,
                    _ => s.flows_per_second,
                })
                .collect();
            if values.len() < 2 * window_steps {
                continue;
            }

            let mut last_emitted: Option<usize> = None;
            for center in window_steps..(values.len() - window_steps) {
                if let Some(last) = last_emitted {
                    if center - last < min_gap_steps {
                        continue;
                    }
                }
                let before = &values[center - window_steps..center];
                let after = &values[center..center + window_steps];
                let combined = &values[center - window_steps..center + window_steps];
                let mean_before = stats::mean(before);
                let mean_after = stats::mean(after);
                let delta = mean_after - mean_before;
                let pooled_std = stats::pstdev(combined);

                let score = if pooled_std > 1e-9 {
                    delta / pooled_std
                } else if delta.abs() > 1e-9 {
                    2.0 * threshold * delta.signum()
                } else {
                    0.0
                };

                if score.abs() < threshold {
                    continue;
                }

                peak_abs_score = peak_abs_score.max(score.abs());
                points.push(ChangePoint {
                    id: format!("changepoint-{}", uuid::Uuid::new_v4()),
                    timestamp: Timestamp::from_seconds(times[center]),
                    metric: metric.to_string(),
                    direction: if delta >= 0.0 { ChangeDirection::Increase } else { ChangeDirection::Decrease },
                    before_mean: mean_before,
                    after_mean: mean_after,
                    mean_delta: delta,
                    score,
                });
                last_emitted = Some(center);
            }
        }

        let component_score = (peak_abs_score / threshold).min(1.0);
        ctx.add_score(self.id(), component_score, Some("changepoint"), &[]);

        Ok(PartialResult::ChangePoints {
            points,
            diagnostics: ChangePointDiagnostics { reasons: vec![] },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricSample, Params, PayloadConfig};
    use std::collections::HashMap;

    fn step_samples(n: usize, before: f64, after: f64, step_at: usize) -> Vec<MetricSample> {
        (0..n)
            .map(|i| {
                let value = if i < step_at { before } else { after };
                MetricSample {
                    timestamp: Timestamp::from_seconds(i as f64),
                    window: None,
                    bytes_per_second: value,
                    packets_per_second: value,
                    flows_per_second: value,
                    protocol_histogram: HashMap::new(),
                    tag_metrics: HashMap::new(),
                }
            })
            .collect()
    }

    #[test]
    fn detects_a_sustained_increase() {
        let samples = step_samples(360, 40.0, 160.0, 180);
        let params = Params::default();
        let payload_config = PayloadConfig::default();
        let packets = vec![];
        let settings = HashMap::new();
        let input = DetectorInput {
            samples: &samples,
            packets: &packets,
            payload_config: &payload_config,
            params: &params,
            settings: &settings,
        };
        let mut ctx = PipelineContext::new();
        let detector = ChangePointDetector::new();
        let partial = detector.run(&input, &mut ctx).unwrap();
        match partial {
            PartialResult::ChangePoints { points, .. } => {
                assert!(points.iter().any(|p| p.metric == "bytesPerSecond" && p.direction == ChangeDirection::Increase));
            }
            _ => panic!("expected change-point partial"),
        }
    }
}
