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

//! Request/response envelope and the entities detectors populate. Input
//! metric samples are parsed leniently (missing numeric fields default to
//! zero, malformed tag entries are dropped) via [`MetricSample::from_value`]
//! rather than a strict derived `Deserialize`, since one bad field in one
//! sample must not reject the whole request.

use crate::error::AnalyzerError;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per-tag byte/packet totals inside a single sample's `tagMetrics` entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagStat {
    #[serde(default)]
    pub bytes: f64,
    #[serde(default)]
    pub packets: f64,
}

pub type TagMap = HashMap<String, HashMap<String, TagStat>>;

/// One observation window as carried through the pipeline and echoed back
/// in the response's `metrics` list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    pub bytes_per_second: f64,
    pub packets_per_second: f64,
    pub flows_per_second: f64,
    pub protocol_histogram: HashMap<String, i64>,
    pub tag_metrics: TagMap,
}

impl MetricSample {
    /// Lenient parse from a raw JSON value: unknown numeric fields default
    /// to `0.0`, and tag entries that don't match the expected shape are
    /// skipped rather than rejecting the whole sample. Only a missing or
    /// unparseable `timestamp` is fatal.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, AnalyzerError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AnalyzerError::invalid_sample("metric sample must be a JSON object"))?;

        let timestamp_value = obj
            .get("timestamp")
            .ok_or_else(|| AnalyzerError::invalid_sample("metric sample missing timestamp"))?;
        let timestamp = Timestamp::parse_value(timestamp_value)
            .map_err(|err| AnalyzerError::invalid_sample(err.to_string()))?;

        let window = obj
            .get("window")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let bytes_per_second = obj.get("bytesPerSecond").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let packets_per_second = obj.get("packetsPerSecond").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let flows_per_second = obj.get("flowsPerSecond").and_then(|v| v.as_f64()).unwrap_or(0.0);

        let protocol_histogram = obj
            .get("protocolHistogram")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();

        let tag_metrics = obj
            .get("tagMetrics")
            .and_then(|v| v.as_object())
            .map(|tag_types| {
                tag_types
                    .iter()
                    .filter_map(|(tag_type, inner)| {
                        let inner_obj = inner.as_object()?;
                        let values: HashMap<String, TagStat> = inner_obj
                            .iter()
                            .filter_map(|(tag_value, stat)| {
                                let stat_obj = stat.as_object()?;
                                let bytes = stat_obj.get("bytes").and_then(|v| v.as_f64()).unwrap_or(0.0);
                                let packets = stat_obj.get("packets").and_then(|v| v.as_f64()).unwrap_or(0.0);
                                Some((tag_value.clone(), TagStat { bytes, packets }))
                            })
                            .collect();
                        Some((tag_type.clone(), values))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(MetricSample {
            timestamp,
            window,
            bytes_per_second,
            packets_per_second,
            flows_per_second,
            protocol_histogram,
            tag_metrics,
        })
    }
}

/// Raw packet descriptor, used only to build `payloadSummary`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PacketRecord {
    pub info: String,
    pub length: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Spike,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub id: String,
    pub timestamp: Timestamp,
    pub metric: String,
    pub value: f64,
    pub baseline: f64,
    pub z_score: f64,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Anomaly {
    pub fn new_id() -> String {
        format!("anomaly-{}", uuid::Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWindow {
    pub lower_bound: Timestamp,
    pub upper_bound: Timestamp,
}

/// A group of anomalies sharing a tag (or, when untagged, a metric). Field
/// name `anomaly_i_ds` serializes as `anomalyIDs` under camelCase, matching
/// the wire contract consumers key on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub window: ClusterWindow,
    pub anomaly_i_ds: Vec<String>,
    pub peak_timestamp: Timestamp,
    pub peak_value: f64,
    pub peak_z_score: f64,
    #[serde(rename = "totalAnomalies")]
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<f64>,
    pub confidence: f64,
    pub narrative: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePoint {
    pub id: String,
    pub timestamp: Timestamp,
    pub metric: String,
    pub direction: ChangeDirection,
    pub before_mean: f64,
    pub after_mean: f64,
    pub mean_delta: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureContribution {
    pub feature: String,
    pub weight: f64,
    pub z_score: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultivariateScore {
    pub id: String,
    pub timestamp: Timestamp,
    pub score: f64,
    pub values: BTreeMap<String, f64>,
    pub z_scores: BTreeMap<String, f64>,
    pub contributions: Vec<FeatureContribution>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTalker {
    pub id: String,
    pub tag_type: String,
    pub tag_value: String,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub total_bytes: f64,
    pub samples: usize,
    pub entropy_delta: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScore {
    pub detector: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_packets: f64,
    pub total_bytes: f64,
    pub mean_bytes_per_second: f64,
    pub mean_packets_per_second: f64,
    pub mean_flows_per_second: f64,
    pub window_seconds: f64,
    pub z_threshold: f64,
}

/// Free-form echo/breadcrumb bag. Serializes transparently as a plain JSON
/// object so dynamic keys like `detector:<id>:message` sit alongside the
/// well-known echoed fields without a bespoke wire shape.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Settings(pub BTreeMap<String, serde_json::Value>);

impl Settings {
    pub fn new() -> Self {
        Settings(BTreeMap::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn record_detector_failure(&mut self, detector_id: &str, message: &str) {
        self.set(format!("detector:{detector_id}:message"), message.to_string());
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSummary {
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub tls_client_hello: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub tls_server_hello: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub http_requests: u64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub observed_payload_bytes: f64,
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Params {
    pub window_seconds: f64,
    pub z_threshold: f64,
    pub algorithm: String,
    pub ewma_alpha: f64,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            window_seconds: 60.0,
            z_threshold: 3.0,
            algorithm: "zscore".to_string(),
            ewma_alpha: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PayloadConfig {
    pub capture_mode: Option<String>,
    pub payload_inspection_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertsConfig {
    pub score_threshold: Option<f64>,
    pub destinations: Vec<String>,
}

impl AlertsConfig {
    pub fn threshold(&self) -> f64 {
        self.score_threshold.unwrap_or(0.9)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Controls {
    pub disable_detectors: Vec<String>,
    pub detector_params: HashMap<String, serde_json::Value>,
    pub alerts: Option<AlertsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub metrics: Vec<serde_json::Value>,
    #[serde(default)]
    pub packets: Vec<PacketRecord>,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub payload_config: PayloadConfig,
    #[serde(default)]
    pub controls: Controls,
    /// Legacy alias for `controls.alerts`; `controls.alerts` wins when both
    /// are present.
    #[serde(default)]
    pub alerts: Option<AlertsConfig>,
}

impl Request {
    pub fn effective_alerts(&self) -> AlertsConfig {
        self.controls
            .alerts
            .clone()
            .or_else(|| self.alerts.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselinePoint {
    pub timestamp: Timestamp,
    pub bytes_per_second: f64,
    pub packets_per_second: f64,
    pub flows_per_second: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalBandPoint {
    pub timestamp: Timestamp,
    pub baseline: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalityMetric {
    pub confidence: f64,
    pub residual_std_dev: f64,
    pub band: Vec<SeasonalBandPoint>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalityDiagnostics {
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalityPayload {
    pub selected_period_seconds: f64,
    pub metrics: BTreeMap<String, SeasonalityMetric>,
    pub diagnostics: SeasonalityDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePointDiagnostics {
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePointSection {
    pub points: Vec<ChangePoint>,
    pub diagnostics: ChangePointDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultivariateDiagnostics {
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultivariateSection {
    pub scores: Vec<MultivariateScore>,
    pub diagnostics: MultivariateDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTalkerDiagnostics {
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTalkerSection {
    pub talkers: Vec<NewTalker>,
    pub diagnostics: NewTalkerDiagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: String,
    pub timestamp: Timestamp,
    pub detector: String,
    pub score: f64,
    pub destinations: Vec<String>,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsSection {
    pub events: Vec<AlertEvent>,
    pub config: AlertsConfig,
}

/// Wire-format generation identifier consumers key on; see the design
/// note about treating it as a versioned constant.
pub const PHASE: &str = "phase6.6";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedDetection {
    pub phase: String,
    pub scores: Vec<ComponentScore>,
    pub reason_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seasonality_confidence: Option<f64>,
    pub processing_latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seasonality: Option<SeasonalityPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_points: Option<ChangePointSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multivariate: Option<MultivariateSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_talkers: Option<NewTalkerSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts: Option<AlertsSection>,
}

impl Default for AdvancedDetection {
    fn default() -> Self {
        AdvancedDetection {
            phase: PHASE.to_string(),
            scores: Vec::new(),
            reason_codes: Vec::new(),
            seasonality_confidence: None,
            processing_latency_ms: 0.0,
            seasonality: None,
            change_points: None,
            multivariate: None,
            new_talkers: None,
            alerts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub metrics: Vec<MetricSample>,
    pub baseline: Vec<BaselinePoint>,
    pub anomalies: Vec<Anomaly>,
    pub clusters: Vec<Cluster>,
    pub summary: Summary,
    pub settings: Settings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_summary: Option<PayloadSummary>,
    pub advanced_detection: AdvancedDetection,
}
