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

//! The shared accumulator every detector mutates through. `merge` is the
//! single key-dispatched routine the design notes ask for: a tagged enum
//! of known merge policies rather than a generic string-keyed dictionary.

use crate::error::DetectorError;
use crate::model::{
    AdvancedDetection, AlertEvent, AlertsConfig, AlertsSection, Anomaly, BaselinePoint,
    ChangePoint, ChangePointDiagnostics, ChangePointSection, Cluster, ComponentScore,
    MetricSample, MultivariateDiagnostics, MultivariateScore, MultivariateSection, NewTalker,
    NewTalkerDiagnostics, NewTalkerSection, PayloadSummary, Response, SeasonalityPayload,
    Settings, Summary,
};

/// One detector's contribution, merged into the context by `merge`. Models
/// the reference's per-key dictionary dispatch as an exhaustively-matched
/// enum instead.
pub enum PartialResult {
    /// The baseline detector's seed of the primary result lists.
    Baseline {
        metrics: Vec<MetricSample>,
        baseline: Vec<BaselinePoint>,
        anomalies: Vec<Anomaly>,
        clusters: Vec<Cluster>,
        summary: Summary,
        settings: Settings,
        payload_summary: Option<PayloadSummary>,
    },
    Seasonality(SeasonalityPayload),
    ChangePoints {
        points: Vec<ChangePoint>,
        diagnostics: ChangePointDiagnostics,
    },
    Multivariate {
        scores: Vec<MultivariateScore>,
        diagnostics: MultivariateDiagnostics,
    },
    NewTalkers {
        talkers: Vec<NewTalker>,
        diagnostics: NewTalkerDiagnostics,
    },
    /// A detector ran but produced nothing to merge (e.g. it only calls
    /// `add_score` with a skip reason).
    None,
}

#[derive(Default)]
pub struct PipelineContext {
    pub metrics: Vec<MetricSample>,
    pub baseline: Vec<BaselinePoint>,
    pub anomalies: Vec<Anomaly>,
    pub clusters: Vec<Cluster>,
    pub summary: Summary,
    pub settings: Settings,
    pub payload_summary: Option<PayloadSummary>,
    pub seasonality: Option<SeasonalityPayload>,
    pub change_points: Vec<ChangePoint>,
    pub change_point_diagnostics: ChangePointDiagnostics,
    pub multivariate_scores: Vec<MultivariateScore>,
    pub multivariate_diagnostics: MultivariateDiagnostics,
    pub new_talkers: Vec<NewTalker>,
    pub new_talker_diagnostics: NewTalkerDiagnostics,
    pub scores: Vec<ComponentScore>,
    pub reason_codes: Vec<String>,
    pub alert_events: Vec<AlertEvent>,
    pub alerts_config: AlertsConfig,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, partial: PartialResult) {
        match partial {
            PartialResult::Baseline {
                metrics,
                baseline,
                anomalies,
                clusters,
                summary,
                settings,
                payload_summary,
            } => {
                self.metrics.extend(metrics);
                self.baseline.extend(baseline);
                self.anomalies.extend(anomalies);
                self.clusters.extend(clusters);
                self.summary = summary;
                for (key, value) in settings.0 {
                    self.settings.0.insert(key, value);
                }
                if let Some(payload) = payload_summary {
                    self.payload_summary = Some(payload);
                }
            }
            PartialResult::Seasonality(payload) => {
                self.seasonality = Some(payload);
            }
            PartialResult::ChangePoints { points, diagnostics } => {
                self.change_points.extend(points);
                self.change_point_diagnostics = diagnostics;
            }
            PartialResult::Multivariate { scores, diagnostics } => {
                self.multivariate_scores.extend(scores);
                self.multivariate_diagnostics = diagnostics;
            }
            PartialResult::NewTalkers { talkers, diagnostics } => {
                self.new_talkers.extend(talkers);
                self.new_talker_diagnostics = diagnostics;
            }
            PartialResult::None => {}
        }
    }

    /// Records a detector's self-reported salience. Reason codes are
    /// deduplicated across the whole run, preserving first occurrence.
    pub fn add_score(&mut self, detector: &str, score: f64, label: Option<&str>, reasons: &[String]) {
        for reason in reasons {
            if !self.reason_codes.contains(reason) {
                self.reason_codes.push(reason.clone());
            }
        }
        self.scores.push(ComponentScore {
            detector: detector.to_string(),
            score,
            weight: None,
            label: label.map(|s| s.to_string()),
            reasons: reasons.to_vec(),
        });
    }

    /// A detector raised an error: fold it into a `detector-failure`
    /// component score and a settings breadcrumb instead of aborting.
    pub fn record_detector_error(&mut self, detector_id: &str, err: &DetectorError) {
        self.settings.record_detector_failure(detector_id, &err.0);
        self.add_score(
            detector_id,
            0.0,
            Some("detector-failure"),
            &[format!("error:{detector_id}")],
        );
    }

    pub fn set_alerts_config(&mut self, config: AlertsConfig) {
        self.alerts_config = config;
    }

    pub fn push_alert(&mut self, event: AlertEvent) {
        self.alert_events.push(event);
    }

    /// Builds the final response envelope. `latency_ms` is measured by the
    /// caller across the whole `process` call, not reconstructed here.
    pub fn into_response(self, latency_ms: f64) -> Response {
        let seasonality_confidence = self.seasonality.as_ref().map(|payload| {
            if payload.metrics.is_empty() {
                0.0
            } else {
                payload.metrics.values().map(|m| m.confidence).sum::<f64>()
                    / payload.metrics.len() as f64
            }
        });

        let change_points = if self.change_points.is_empty() && self.change_point_diagnostics.reasons.is_empty() {
            None
        } else {
            Some(ChangePointSection {
                points: self.change_points,
                diagnostics: self.change_point_diagnostics,
            })
        };

        let multivariate = if self.multivariate_scores.is_empty() && self.multivariate_diagnostics.reasons.is_empty() {
            None
        } else {
            Some(MultivariateSection {
                scores: self.multivariate_scores,
                diagnostics: self.multivariate_diagnostics,
            })
        };

        let new_talkers = if self.new_talkers.is_empty() && self.new_talker_diagnostics.reasons.is_empty() {
            None
        } else {
            Some(NewTalkerSection {
                talkers: self.new_talkers,
                diagnostics: self.new_talker_diagnostics,
            })
        };

        let alerts = if self.alert_events.is_empty() {
            None
        } else {
            Some(AlertsSection {
                events: self.alert_events,
                config: self.alerts_config,
            })
        };

        let advanced_detection = AdvancedDetection {
            phase: crate::model::PHASE.to_string(),
            scores: self.scores,
            reason_codes: self.reason_codes,
            seasonality_confidence,
            processing_latency_ms: (latency_ms * 1000.0).round() / 1000.0,
            seasonality: self.seasonality,
            change_points,
            multivariate,
            new_talkers,
            alerts,
        };

        Response {
            metrics: self.metrics,
            baseline: self.baseline,
            anomalies: self.anomalies,
            clusters: self.clusters,
            summary: self.summary,
            settings: self.settings,
            payload_summary: self.payload_summary,
            advanced_detection,
        }
    }
}
