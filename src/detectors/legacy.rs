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

//! The always-present baseline detector: univariate anomaly detection over
//! the three core rate metrics, a parallel per-tag sub-pass, and clustering
//! of whatever either pass emits. This is the one detector the pipeline
//! runs outside the fault-tolerant dispatch loop — see `pipeline::process`.

use super::{Detector, DetectorInput};
use crate::context::{PartialResult, PipelineContext};
use crate::error::DetectorError;
use crate::model::{
    Anomaly, BaselinePoint, Cluster, ClusterWindow, Direction, MetricSample, PayloadSummary,
    Settings, Summary, TagStat,
};
use crate::stats;
use crate::timestamp::Timestamp;
use std::collections::HashMap;

pub struct LegacyAnomalyDetector;

impl LegacyAnomalyDetector {
    pub fn new() -> Self {
        LegacyAnomalyDetector
    }
}

impl Default for LegacyAnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

const CORE_METRICS: [&str; 3] = ["bytesPerSecond", "packetsPerSecond", "flowsPerSecond"];

impl Detector for LegacyAnomalyDetector {
    fn id(&self) -> &'static str {
        "legacy"
    }

    fn run(
        &self,
        input: &DetectorInput,
        ctx: &mut PipelineContext,
    ) -> Result<PartialResult, DetectorError> {
        if input.samples.is_empty() {
            // The pipeline's pre-flight check makes this unreachable; kept
            // defensive rather than panicking on a future caller change.
            return Err(DetectorError::new("no metric samples"));
        }

        let times: Vec<f64> = input.samples.iter().map(|s| s.timestamp.as_seconds()).collect();
        let sample_interval = stats::median_diff_floor(&times, 1.0);
        let window_seconds = input.setting_f64("windowSeconds", input.params.window_seconds);
        let window_count = ((window_seconds / sample_interval).round() as i64).max(3) as usize;
        let algorithm = input.setting_str("algorithm", &input.params.algorithm);
        let z_threshold = input.setting_f64("zThreshold", input.params.z_threshold);
        let ewma_alpha = input.setting_f64("ewmaAlpha", input.params.ewma_alpha);

        let mut anomalies: Vec<Anomaly> = Vec::new();
        let mut baseline_series: HashMap<&str, Vec<f64>> = HashMap::new();

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
            let metric_anomalies =
                score_series(metric, &values, &times, &algorithm, z_threshold, ewma_alpha, window_count);
            anomalies.extend(metric_anomalies);

            let baselines = if algorithm == "ewma" {
                stats::ewma(&values, ewma_alpha)
            } else {
                stats::sliding_baseline(&values, window_count)
            };
            baseline_series.insert(metric, baselines);
        }

        let mut tag_anomalies = tag_sub_pass(input.samples, z_threshold, window_count);
        anomalies.append(&mut tag_anomalies);

        let clusters = build_clusters(&anomalies);

        let baseline: Vec<BaselinePoint> = (0..input.samples.len())
            .map(|i| BaselinePoint {
                timestamp: input.samples[i].timestamp,
                bytes_per_second: baseline_series["bytesPerSecond"][i],
                packets_per_second: baseline_series["packetsPerSecond"][i],
                flows_per_second: baseline_series["flowsPerSecond"][i],
            })
            .collect();

        let summary = build_summary(input.samples, window_seconds, z_threshold);
        let mut settings = Settings::new();
        if let Some(mode) = &input.payload_config.capture_mode {
            settings.set("captureMode", mode.clone());
        }
        settings.set("payloadInspectionEnabled", input.payload_config.payload_inspection_enabled);
        settings.set("algorithm", algorithm.clone());
        settings.set("ewmaAlpha", ewma_alpha);

        let payload_summary = if input.payload_config.payload_inspection_enabled && !input.packets.is_empty() {
            Some(summarize_payloads(input.packets))
        } else {
            None
        };

        ctx.add_score(
            self.id(),
            1.0,
            Some("baseline-analyzer"),
            &["legacy.detector.active".to_string()],
        );

        Ok(PartialResult::Baseline {
            metrics: input.samples.to_vec(),
            baseline,
            anomalies,
            clusters,
            summary,
            settings,
            payload_summary,
        })
    }
}

fn score_series(
    metric: &str,
    values: &[f64],
    times: &[f64],
    algorithm: &str,
    z_threshold: f64,
    ewma_alpha: f64,
    window_count: usize,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if algorithm == "ewma" {
        let mut estimate = values[0];
        let mut residuals = vec![0.0; values.len()];
        for i in 1..values.len() {
            let predicted = estimate;
            residuals[i] = values[i] - predicted;
            estimate = ewma_alpha * values[i] + (1.0 - ewma_alpha) * estimate;
        }
        for i in 3..values.len() {
            let start = i.saturating_sub(window_count);
            let (res_mean, res_std) = stats::rolling_stats(&residuals[start..i]);
            if res_std <= 0.0 {
                continue;
            }
            let z = (residuals[i] - res_mean) / res_std;
            if z.abs() >= z_threshold {
                let predicted = values[i] - residuals[i];
                anomalies.push(make_anomaly(metric, times[i], values[i], predicted, z));
            }
        }
        return anomalies;
    }

    for i in 3..values.len() {
        let start = i.saturating_sub(window_count);
        let window = &values[start..i];
        let (location, scale) = if algorithm == "mad" {
            stats::rolling_stats_mad(window)
        } else {
            stats::rolling_stats(window)
        };
        if scale <= 0.0 {
            continue;
        }
        let z = (values[i] - location) / scale;
        if z.abs() >= z_threshold {
            anomalies.push(make_anomaly(metric, times[i], values[i], location, z));
        }
    }
    anomalies
}

fn make_anomaly(metric: &str, time: f64, value: f64, baseline: f64, z: f64) -> Anomaly {
    Anomaly {
        id: Anomaly::new_id(),
        timestamp: Timestamp::from_seconds(time),
        metric: metric.to_string(),
        value,
        baseline,
        z_score: z,
        direction: if value >= baseline { Direction::Spike } else { Direction::Drop },
        tag_type: None,
        tag_value: None,
        context: Some(format!(
            "{} vs baseline {}",
            stats::format_bytes(value),
            stats::format_bytes(baseline)
        )),
    }
}

struct TagHistory {
    values: std::collections::VecDeque<f64>,
}

fn tag_sub_pass(samples: &[MetricSample], z_threshold: f64, window_count: usize) -> Vec<Anomaly> {
    let cap = (4 * window_count).max(window_count + 1);
    let mut histories: HashMap<(String, String), TagHistory> = HashMap::new();
    let mut anomalies = Vec::new();

    for sample in samples {
        for (tag_type, values_by_tag) in &sample.tag_metrics {
            for (tag_value, stat) in values_by_tag {
                let key = (tag_type.clone(), tag_value.clone());
                if let Some(hist) = histories.get(&key) {
                    if hist.values.len() >= window_count {
                        let window: Vec<f64> = hist.values.iter().copied().collect();
                        let (mean, std) = stats::rolling_stats(&window);
                        if std > 0.0 {
                            let z = (stat.bytes - mean) / std;
                            if z.abs() >= z_threshold {
                                anomalies.push(tag_anomaly(sample, tag_type, tag_value, stat, mean, z));
                            }
                        }
                    }
                }
                let hist = histories.entry(key).or_insert_with(|| TagHistory {
                    values: std::collections::VecDeque::new(),
                });
                hist.values.push_back(stat.bytes);
                while hist.values.len() > cap {
                    hist.values.pop_front();
                }
            }
        }
    }
    anomalies
}

fn tag_anomaly(
    sample: &MetricSample,
    tag_type: &str,
    tag_value: &str,
    stat: &TagStat,
    baseline: f64,
    z: f64,
) -> Anomaly {
    Anomaly {
        id: Anomaly::new_id(),
        timestamp: sample.timestamp,
        metric: format!("bytesPerSecond[{tag_type}]"),
        value: stat.bytes,
        baseline,
        z_score: z,
        direction: if stat.bytes >= baseline { Direction::Spike } else { Direction::Drop },
        tag_type: Some(tag_type.to_string()),
        tag_value: Some(tag_value.to_string()),
        context: Some(format!(
            "{} vs baseline {}",
            stats::format_bytes(stat.bytes),
            stats::format_bytes(baseline)
        )),
    }
}

fn build_clusters(anomalies: &[Anomaly]) -> Vec<Cluster> {
    let mut buckets: HashMap<(Option<String>, Option<String>, Option<String>), Vec<&Anomaly>> =
        HashMap::new();
    for anomaly in anomalies {
        let key = match (&anomaly.tag_type, &anomaly.tag_value) {
            (Some(t), Some(v)) => (Some(t.clone()), Some(v.clone()), None),
            _ => (None, None, Some(anomaly.metric.clone())),
        };
        buckets.entry(key).or_default().push(anomaly);
    }

    let mut clusters: Vec<Cluster> = buckets
        .into_iter()
        .map(|((tag_type, tag_value, metric), mut members)| {
            members.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap());
            let peak = members
                .iter()
                .max_by(|a, b| a.z_score.abs().partial_cmp(&b.z_score.abs()).unwrap())
                .unwrap();
            let count = members.len();
            let confidence = ((0.35 + count as f64 / 10.0 + peak.z_score.abs() / 6.0).min(1.0) * 1000.0).round()
                / 1000.0;
            let context_bytes: Vec<f64> = members
                .iter()
                .filter(|a| a.tag_type.is_some() && a.value.is_finite())
                .map(|a| a.value)
                .collect();
            let total_bytes = if context_bytes.is_empty() {
                None
            } else {
                Some(context_bytes.iter().sum::<f64>())
            };
            let formatted = if context_bytes.is_empty() {
                format!("{:.1}", peak.value)
            } else {
                stats::format_bytes(context_bytes.iter().cloned().fold(f64::MIN, f64::max))
            };
            let actor = tag_value.clone().or_else(|| metric.clone()).unwrap_or_else(|| "series".to_string());
            let direction_word = match peak.direction {
                Direction::Spike => "spike",
                Direction::Drop => "drop",
            };
            let narrative = format!(
                "{actor} experienced a {direction_word} peaking at {formatted} ({:.1}\u{3c3})",
                peak.z_score.abs()
            );
            Cluster {
                id: format!("cluster-{}", uuid::Uuid::new_v4()),
                tag_type,
                tag_value,
                metric,
                window: ClusterWindow {
                    lower_bound: members.first().unwrap().timestamp,
                    upper_bound: members.last().unwrap().timestamp,
                },
                anomaly_i_ds: members.iter().map(|a| a.id.clone()).collect(),
                peak_timestamp: peak.timestamp,
                peak_value: peak.value,
                peak_z_score: peak.z_score,
                count,
                total_bytes,
                confidence,
                narrative,
            }
        })
        .collect();

    clusters.sort_by(|a, b| b.peak_z_score.abs().partial_cmp(&a.peak_z_score.abs()).unwrap());
    clusters
}

fn build_summary(samples: &[MetricSample], window_seconds: f64, z_threshold: f64) -> Summary {
    let total_packets: f64 = samples.iter().map(|s| s.packets_per_second).sum();
    let total_bytes: f64 = samples.iter().map(|s| s.bytes_per_second).sum();
    let bytes: Vec<f64> = samples.iter().map(|s| s.bytes_per_second).collect();
    let packets: Vec<f64> = samples.iter().map(|s| s.packets_per_second).collect();
    let flows: Vec<f64> = samples.iter().map(|s| s.flows_per_second).collect();
    Summary {
        total_packets,
        total_bytes,
        mean_bytes_per_second: stats::mean(&bytes),
        mean_packets_per_second: stats::mean(&packets),
        mean_flows_per_second: stats::mean(&flows),
        window_seconds,
        z_threshold,
    }
}

const HTTP_METHODS: [&str; 7] = ["get", "post", "put", "delete", "head", "patch", "options"];

fn summarize_payloads(packets: &[crate::model::PacketRecord]) -> PayloadSummary {
    let mut summary = PayloadSummary::default();
    for packet in packets {
        let info = packet.info.to_lowercase();
        if info.contains("client hello") {
            summary.tls_client_hello += 1;
        }
        if info.contains("server hello") {
            summary.tls_server_hello += 1;
        }
        if HTTP_METHODS.iter().any(|method| info.contains(method)) {
            summary.http_requests += 1;
        }
        summary.observed_payload_bytes += packet.length;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PayloadConfig, Params};

    fn sample(ts: f64, bytes: f64) -> MetricSample {
        MetricSample {
            timestamp: Timestamp::from_seconds(ts),
            window: None,
            bytes_per_second: bytes,
            packets_per_second: bytes / 10.0,
            flows_per_second: bytes / 100.0,
            protocol_histogram: HashMap::new(),
            tag_metrics: HashMap::new(),
        }
    }

    #[test]
    fn flat_constant_series_has_no_anomalies() {
        let samples = vec![sample(0.0, 10.0), sample(1.0, 10.0), sample(2.0, 10.0)];
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
        let detector = LegacyAnomalyDetector::new();
        let partial = detector.run(&input, &mut ctx).unwrap();
        match partial {
            PartialResult::Baseline { anomalies, .. } => assert!(anomalies.is_empty()),
            _ => panic!("expected baseline partial"),
        }
    }

    #[test]
    fn clusters_are_sorted_by_peak_z_descending() {
        let low = Anomaly {
            id: "a".into(),
            timestamp: Timestamp::from_seconds(0.0),
            metric: "bytesPerSecond".into(),
            value: 10.0,
            baseline: 5.0,
            z_score: 3.1,
            direction: Direction::Spike,
            tag_type: None,
            tag_value: None,
            context: None,
        };
        let high = Anomaly {
            id: "b".into(),
            timestamp: Timestamp::from_seconds(1.0),
            metric: "packetsPerSecond".into(),
            value: 40.0,
            baseline: 5.0,
            z_score: 9.0,
            direction: Direction::Spike,
            tag_type: None,
            tag_value: None,
            context: None,
        };
        let clusters = build_clusters(&[low, high]);
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].peak_z_score.abs() >= clusters[1].peak_z_score.abs());
    }
}
