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

//! Manifest-driven detector registry and per-request orchestration. The
//! baseline detector runs first and unconditionally — it seeds the result
//! lists the response invariants depend on — and is the only stage outside
//! the fault-tolerant dispatch loop that shields every other detector's
//! errors from aborting the run.

use crate::alerts;
use crate::context::PipelineContext;
use crate::detectors::{
    ChangePointDetector, Detector, DetectorInput, LegacyAnomalyDetector, MultivariateDetector,
    NewTalkerDetector, SeasonalityDetector,
};
use crate::error::AnalyzerError;
use crate::manifest::Manifest;
use crate::model::{MetricSample, Request, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info_span, warn};

pub struct AnalyzerPipeline {
    manifest: Manifest,
}

impl AnalyzerPipeline {
    pub fn new(manifest: Manifest) -> Self {
        AnalyzerPipeline { manifest }
    }

    pub fn process(&self, request: Request) -> Result<Response, AnalyzerError> {
        let started = Instant::now();

        if request.metrics.is_empty() {
            return Err(AnalyzerError::InvalidRequest("metrics must not be empty".to_string()));
        }

        let mut samples: Vec<MetricSample> = request
            .metrics
            .iter()
            .map(MetricSample::from_value)
            .collect::<Result<_, _>>()?;
        samples.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap());

        let span = info_span!(
            "analyzer_pipeline.process",
            metric_count = samples.len() as u64,
            packet_count = request.packets.len() as u64,
            detector_count = self.manifest.detectors.len() as u64,
        );
        let _entered = span.enter();

        let mut ctx = PipelineContext::new();

        let legacy_input = DetectorInput {
            samples: &samples,
            packets: &request.packets,
            payload_config: &request.payload_config,
            params: &request.params,
            settings: &HashMap::new(),
        };
        let legacy = LegacyAnomalyDetector::new();
        let partial = legacy
            .run(&legacy_input, &mut ctx)
            .map_err(|err| AnalyzerError::invalid_sample(err.0))?;
        ctx.merge(partial);

        for entry in &self.manifest.detectors {
            if entry.resolver == "legacy" || !entry.enabled {
                continue;
            }
            if request.controls.disable_detectors.iter().any(|id| id == &entry.id) {
                continue;
            }

            let Some(detector) = resolve(&entry.resolver) else {
                continue;
            };

            let mut settings: HashMap<String, Value> = entry.config.clone();
            if let Some(Value::Object(override_map)) = request.controls.detector_params.get(&entry.id) {
                for (key, value) in override_map {
                    settings.insert(key.clone(), value.clone());
                }
            }

            let input = DetectorInput {
                samples: &samples,
                packets: &request.packets,
                payload_config: &request.payload_config,
                params: &request.params,
                settings: &settings,
            };

            let detector_span = info_span!(
                "detector.dispatch",
                detector_id = %entry.id,
                enabled = entry.enabled,
                duration_ms = tracing::field::Empty,
                score = tracing::field::Empty,
            );
            let _detector_entered = detector_span.enter();
            let dispatch_started = Instant::now();
            match detector.run(&input, &mut ctx) {
                Ok(partial) => {
                    ctx.merge(partial);
                    let score = ctx.scores.last().map(|s| s.score).unwrap_or(0.0);
                    detector_span.record("duration_ms", dispatch_started.elapsed().as_secs_f64() * 1000.0);
                    detector_span.record("score", score);
                }
                Err(err) => {
                    warn!(detector_id = %entry.id, error = %err, "detector dispatch failed, continuing");
                    ctx.record_detector_error(&entry.id, &err);
                    detector_span.record("duration_ms", dispatch_started.elapsed().as_secs_f64() * 1000.0);
                }
            }
        }

        let alerts_config = request.effective_alerts();
        alerts::evaluate_alerts(&mut ctx, alerts_config);

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(ctx.into_response(latency_ms))
    }
}

impl Default for AnalyzerPipeline {
    fn default() -> Self {
        AnalyzerPipeline::new(Manifest::default_builtin())
    }
}

fn resolve(resolver: &str) -> Option<Box<dyn Detector>> {
    match resolver {
        "seasonality" => Some(Box::new(SeasonalityDetector::new())),
        "changepoint" => Some(Box::new(ChangePointDetector::new())),
        "multivariate" => Some(Box::new(MultivariateDetector::new())),
        "newtalker" => Some(Box::new(NewTalkerDetector::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with_samples(n: usize) -> Request {
        let metrics: Vec<Value> = (0..n)
            .map(|i| json!({ "timestamp": i as f64, "bytesPerSecond": 10.0 + i as f64 }))
            .collect();
        let value = json!({ "metrics": metrics });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn empty_metrics_is_fatal() {
        let pipeline = AnalyzerPipeline::default();
        let request = request_with_samples(0);
        let result = pipeline.process(request);
        assert!(result.is_err());
    }

    #[test]
    fn small_flat_series_has_no_anomalies_and_full_envelope() {
        let pipeline = AnalyzerPipeline::default();
        let value = json!({
            "metrics": [
                { "timestamp": 0.0, "bytesPerSecond": 10.0 },
                { "timestamp": 1.0, "bytesPerSecond": 12.0 }
            ]
        });
        let request: Request = serde_json::from_value(value).unwrap();
        let response = pipeline.process(request).unwrap();
        assert!(response.anomalies.is_empty());
        assert_eq!(response.metrics.len(), 2);
        assert_eq!(response.baseline.len(), response.metrics.len());
        assert!(response.advanced_detection.seasonality.is_none());
    }

    #[test]
    fn disabling_a_detector_removes_its_score() {
        let pipeline = AnalyzerPipeline::default();
        let metrics: Vec<Value> = (0..200)
            .map(|i| json!({ "timestamp": i as f64, "bytesPerSecond": 50.0 }))
            .collect();
        let value = json!({
            "metrics": metrics,
            "controls": { "disableDetectors": ["seasonality"] }
        });
        let request: Request = serde_json::from_value(value).unwrap();
        let response = pipeline.process(request).unwrap();
        assert!(response.advanced_detection.seasonality.is_none());
        assert!(!response.advanced_detection.scores.iter().any(|s| s.detector == "seasonality"));
    }
}
