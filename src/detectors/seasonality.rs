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

//! Seasonal decomposition: pick the best-explaining period among a small
//! candidate set, then report a baseline + residual band per core metric.

use super::{Detector, DetectorInput};
use crate::context::{PartialResult, PipelineContext};
use crate::error::DetectorError;
use crate::model::{SeasonalBandPoint, SeasonalityDiagnostics, SeasonalityMetric, SeasonalityPayload};
use crate::stats;
use crate::timestamp::Timestamp;
use std::collections::BTreeMap;

pub struct SeasonalityDetector;

impl SeasonalityDetector {
    pub fn new() -> Self {
        SeasonalityDetector
    }
}

impl Default for SeasonalityDetector {
    fn default() -> Self {
        Self::new()
    }
}

const CORE_METRICS: [&str; 3] = ["bytesPerSecond", "packetsPerSecond", "flowsPerSecond"];
const PERIOD_CANDIDATES_SECONDS: [f64; 4] = [60.0, 300.0, 900.0, 3600.0];

impl Detector for SeasonalityDetector {
    fn id(&self) -> &'static str {
        "seasonality"
    }

    fn run(
        &self,
        input: &DetectorInput,
        ctx: &mut PipelineContext,
    ) -> Result<PartialResult, DetectorError> {
        let min_samples = input.setting_usize("minSamples", 60);
        if input.samples.len() < min_samples {
            ctx.add_score(self.id(), 0.0, Some("seasonality"), &["seasonality.insufficient-data".to_string()]);
            return Ok(PartialResult::None);
        }

        let times: Vec<f64> = input.samples.iter().map(|s| s.timestamp.as_seconds()).collect();
        let sample_interval = stats::median_diff_floor(&times, 1.0);
        let min_cycles = input.setting_f64("minCycles", 2.0);
        let band_std_devs = input.setting_f64("bandStdDevs", 2.0);

        let series_by_metric: BTreeMap<&str, Vec<f64>> = CORE_METRICS
            .iter()
            .map(|metric| (*metric, metric_values(input, metric)))
            .collect();

        let mut best: Option<(usize, f64)> = None; // (period_steps, avg_explained)
        for period_seconds in PERIOD_CANDIDATES_SECONDS {
            let period_steps = (period_seconds / sample_interval).round() as i64;
            if period_steps < 2 {
                continue;
            }
            let period_steps = period_steps as usize;
            let min_len = (min_cycles * period_steps as f64).ceil() as usize;
            if input.samples.len() < min_len {
                continue;
            }

            let mut explained_sum = 0.0;
            let mut usable = 0usize;
            for values in series_by_metric.values() {
                let total_var = stats::pvariance(values);
                if total_var <= 0.0 {
                    continue;
                }
                let (_, residuals) = stats::seasonal_baseline(values, period_steps);
                let residual_var = stats::pvariance(&residuals);
                let explained = (1.0 - residual_var / total_var).max(0.0);
                explained_sum += explained;
                usable += 1;
            }
            if usable == 0 {
                continue;
            }
            let avg_explained = explained_sum / usable as f64;
            if best.map(|(_, best_avg)| avg_explained > best_avg).unwrap_or(true) {
                best = Some((period_steps, avg_explained));
            }
        }

        let Some((period_steps, _)) = best else {
            ctx.add_score(self.id(), 0.0, Some("seasonality"), &["seasonality.no-usable-period".to_string()]);
            return Ok(PartialResult::None);
        };

        let mut metrics = BTreeMap::new();
        let mut confidences = Vec::new();
        for (metric, values) in &series_by_metric {
            let total_var = stats::pvariance(values);
            if total_var <= 0.0 {
                continue;
            }
            let (baseline, residuals) = stats::seasonal_baseline(values, period_steps);
            let residual_var = stats::pvariance(&residuals);
            let explained = (1.0 - residual_var / total_var).max(0.0);
            let residual_std_dev = residual_var.sqrt();
            let band: Vec<SeasonalBandPoint> = (0..values.len())
                .map(|i| SeasonalBandPoint {
                    timestamp: Timestamp::from_seconds(times[i]),
                    baseline: baseline[i],
                    lower: (baseline[i] - band_std_devs * residual_std_dev).max(0.0),
                    upper: baseline[i] + band_std_devs * residual_std_dev,
                })
                .collect();
            confidences.push(explained);
            metrics.insert(
                metric.to_string(),
                SeasonalityMetric {
                    confidence: explained,
                    residual_std_dev,
                    band,
                },
            );
        }

        let avg_confidence = stats::mean(&confidences);
        let period_seconds = period_steps as f64 * sample_interval;
        ctx.add_score(
            self.id(),
            avg_confidence,
            Some(&format!("seasonality:period={period_seconds:.0}s")),
            &[],
        );

        Ok(PartialResult::Seasonality(SeasonalityPayload {
            selected_period_seconds: period_seconds,
            metrics,
            diagnostics: SeasonalityDiagnostics { reasons: vec![] },
        }))
    }
}

fn metric_values(input: &DetectorInput, metric: &str) -> Vec<f64> {
    input
        .samples
        .iter()
        .map(|s| match metric {
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

    fn sinusoidal_samples(n: usize) -> Vec<MetricSample> {
        (0..n)
            .map(|i| {
                let value = 50.0 + 10.0 * ((2.0 * std::f64::consts::PI * (i % 60) as f64) / 60.0).sin();
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
    fn selects_the_injected_period() {
        let samples = sinusoidal_samples(180);
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
        let detector = SeasonalityDetector::new();
        let partial = detector.run(&input, &mut ctx).unwrap();
        match partial {
            PartialResult::Seasonality(payload) => {
                assert_eq!(payload.selected_period_seconds, 60.0);
                let bytes_metric = payload.metrics.get("bytesPerSecond").unwrap();
                assert!(bytes_metric.confidence > 0.2);
                assert!(!bytes_metric.band.is_empty());
            }
            _ => panic!("expected seasonality partial"),
        }
    }

    #[test]
    fn short_series_is_skipped() {
        let samples = sinusoidal_samples(10);
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
        let detector = SeasonalityDetector::new();
        let partial = detector.run(&input, &mut ctx).unwrap();
        assert!(matches!(partial, PartialResult::None));
        assert!(ctx.scores.iter().any(|s| s.reasons.iter().any(|r| r == "seasonality.insufficient-data")));
    }
}
