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

//! Mahalanobis-style joint scoring: per-feature z-scores over a trailing
//! window, combined as an L2 norm, with normalized per-feature
//! contributions for explaining which feature drove the score.

use super::{Detector, DetectorInput};
use crate::context::{PartialResult, PipelineContext};
use crate::error::DetectorError;
use crate::model::{Direction, FeatureContribution, MultivariateDiagnostics, MultivariateScore};
use crate::stats;
use crate::timestamp::Timestamp;
use std::collections::BTreeMap;

pub struct MultivariateDetector;

impl MultivariateDetector {
    pub fn new() -> Self {
        MultivariateDetector
    }
}

impl Default for MultivariateDetector {
    fn default() -> Self {
        Self::new()
    }
}

const FEATURES: [&str; 3] = ["bytesPerSecond", "packetsPerSecond", "flowsPerSecond"];

impl Detector for MultivariateDetector {
    fn id(&self) -> &'static str {
        "multivariate"
    }

    fn run(
        &self,
        input: &DetectorInput,
        ctx: &mut PipelineContext,
    ) -> Result<PartialResult, DetectorError> {
        let min_samples = input.setting_usize("minSamples", 180);
        let min_features = input.setting_usize("minFeatures", 2);

        let series: BTreeMap<&str, Vec<f64>> = FEATURES
            .iter()
            .map(|feature| (*feature, feature_values(input, feature)))
            .collect();
        let usable: Vec<&str> = series
            .iter()
            .filter(|(_, values)| stats::pvariance(values) > 0.0)
            .map(|(feature, _)| *feature)
            .collect();

        if input.samples.len() < min_samples || usable.len() < min_features {
            let reason = if input.samples.len() < min_samples {
                "multivariate.insufficient-data"
            } else {
                "multivariate.insufficient-features"
            };
            ctx.add_score(self.id(), 0.0, Some("multivariate"), &[reason.to_string()]);
            return Ok(PartialResult::Multivariate {
                scores: vec![],
                diagnostics: MultivariateDiagnostics { reasons: vec![reason.to_string()] },
            });
        }

        let times: Vec<f64> = input.samples.iter().map(|s| s.timestamp.as_seconds()).collect();
        let sample_interval = stats::median_diff_floor(&times, 1.0);
        let window_seconds = input.setting_f64("windowSeconds", input.params.window_seconds);
        let window_steps = ((window_seconds / sample_interval).round() as i64).max(5) as usize;
        let threshold = input.setting_f64("threshold", 3.0);

        let mut scores = Vec::new();
        let mut peak_joint = 0.0f64;

        for i in window_steps..input.samples.len() {
            let mut z_scores: BTreeMap<String, f64> = BTreeMap::new();
            let mut values_at_i: BTreeMap<String, f64> = BTreeMap::new();
            for feature in &usable {
                let values = &series[feature];
                let window = &values[i - window_steps..i];
                let (mean, std) = stats::rolling_stats(window);
                let value = values[i];
                let z = if std > 1e-9 {
                    (value - mean) / std
                } else if (value - mean).abs() > 1e-6 {
                    10.0 * (value - mean).signum()
                } else {
                    0.0
                };
                z_scores.insert(feature.to_string(), z);
                values_at_i.insert(feature.to_string(), value);
            }

            let joint = z_scores.values().map(|z| z * z).sum::<f64>().sqrt();
            if joint < threshold {
                continue;
            }
            peak_joint = peak_joint.max(joint);

            let abs_sum: f64 = z_scores.values().map(|z| z.abs()).sum();
            let mut contributions: Vec<FeatureContribution> = z_scores
                .iter()
                .map(|(feature, z)| FeatureContribution {
                    feature: feature.clone(),
                    weight: if abs_sum > 0.0 { z.abs() / abs_sum } else { 0.0 },
                    z_score: *z,
                    direction: if *z >= 0.0 { Direction::Spike } else { Direction::Drop },
                })
                .collect();
            contributions.sort_by(|a, b| b.z_score.abs().partial_cmp(&a.z_score.abs()).unwrap());

            scores.push(MultivariateScore {
                id: format!("multivariate-{}", uuid::Uuid::new_v4()),
                timestamp: Timestamp::from_seconds(times[i]),
                score: joint,
                values: values_at_i,
                z_scores,
                contributions,
            });
        }

        let component_score = (peak_joint / threshold).min(1.0);
        ctx.add_score(self.id(), component_score, Some("multivariate"), &[]);

        Ok(PartialResult::Multivariate {
            scores,
            diagnostics: MultivariateDiagnostics { reasons: vec![] },
        })
    }
}

fn feature_values(input: &DetectorInput, feature: &str) -> Vec<f64> {
    input
        .samples
        .iter()
        .map(|s| match feature {
            "bytesPerSecond" => s.bytes_per_second,
            "packetsPerSecond" => s.packets_per_second,
            _ => s.flows_per_second,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricSample, Params, PayloadConfig};
    use std::collections::HashMap;

    fn spike_samples(n: usize) -> Vec<MetricSample> {
        (0..n)
            .map(|i| {
                let spike = (200..240).contains(&i);
                let base = 50.0;
                let value = if spike { 150.0 } else { base };
                MetricSample {
                    timestamp: Timestamp::from_seconds(i as f64),
                    window: None,
                    bytes_per_second: value,
                    packets_per_second: base + (i % 3) as f64,
                    flows_per_second: base + (i % 5) as f64,
                    protocol_histogram: HashMap::new(),
                    tag_metrics: HashMap::new(),
                }
            })
            .collect()
    }

    #[test]
    fn spike_surfaces_bytes_per_second_as_top_contribution() {
        let samples = spike_samples(360);
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
        let detector = MultivariateDetector::new();
        let partial = detector.run(&input, &mut ctx).unwrap();
        match partial {
            PartialResult::Multivariate { scores, .. } => {
                assert!(!scores.is_empty());
                let top = &scores[0].contributions[..2.min(scores[0].contributions.len())];
                assert!(top.iter().any(|c| c.feature == "bytesPerSecond"));
            }
            _ => panic!("expected multivariate partial"),
        }
    }
}
