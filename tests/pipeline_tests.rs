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

use flowsentry_analyzer::{AnalyzerPipeline, Manifest, Request};
use serde_json::{json, Value};
use std::collections::HashSet;

fn run(value: Value) -> flowsentry_analyzer::Response {
    let request: Request = serde_json::from_value(value).unwrap();
    let pipeline = AnalyzerPipeline::new(Manifest::default_builtin());
    pipeline.process(request).unwrap()
}

#[test]
fn small_flat_series() {
    let response = run(json!({
        "metrics": [
            { "timestamp": 0.0, "bytesPerSecond": 10.0 },
            { "timestamp": 1.0, "bytesPerSecond": 12.0 }
        ]
    }));
    assert!(response.anomalies.is_empty());
    assert_eq!(response.metrics.len(), 2);
    assert!(response.advanced_detection.seasonality.is_none());
}

#[test]
fn payload_summary_counts_handshakes_and_requests() {
    let response = run(json!({
        "metrics": [
            { "timestamp": 0.0, "bytesPerSecond": 10.0 },
            { "timestamp": 1.0, "bytesPerSecond": 10.0 },
            { "timestamp": 2.0, "bytesPerSecond": 10.0 }
        ],
        "packets": [
            { "info": "TLSv1.2 Client Hello", "length": 512 },
            { "info": "TLSv1.2 Server Hello", "length": 420 },
            { "info": "HTTP GET /", "length": 900 }
        ],
        "payloadConfig": { "payloadInspectionEnabled": true }
    }));
    let summary = response.payload_summary.expect("payload summary present");
    assert_eq!(summary.tls_client_hello, 1);
    assert_eq!(summary.tls_server_hello, 1);
    assert_eq!(summary.http_requests, 1);
    assert_eq!(summary.observed_payload_bytes, 1832.0);
}

#[test]
fn seasonality_selects_the_injected_sixty_second_period() {
    let metrics: Vec<Value> = (0..180)
        .map(|i| {
            let value = 50.0 + 10.0 * ((2.0 * std::f64::consts::PI * (i % 60) as f64) / 60.0).sin();
            json!({ "timestamp": i as f64, "bytesPerSecond": value })
        })
        .collect();
    let response = run(json!({ "metrics": metrics }));
    let seasonality = response
        .advanced_detection
        .seasonality
        .expect("seasonality present");
    assert_eq!(seasonality.selected_period_seconds, 60.0);
    let metric = seasonality.metrics.get("bytesPerSecond").expect("bytesPerSecond band");
    assert!(!metric.band.is_empty());
    assert!(metric.confidence > 0.2);
}

#[test]
fn change_point_detects_a_sustained_increase() {
    let metrics: Vec<Value> = (0..360)
        .map(|i| {
            let value = if i < 180 { 40.0 } else { 160.0 };
            json!({ "timestamp": i as f64, "bytesPerSecond": value })
        })
        .collect();
    let response = run(json!({ "metrics": metrics }));
    let section = response.advanced_detection.change_points.expect("change points present");
    assert!(section
        .points
        .iter()
        .any(|p| p.metric == "bytesPerSecond" && p.direction == flowsentry_analyzer::model::ChangeDirection::Increase));
}

#[test]
fn multivariate_spike_surfaces_bytes_per_second() {
    let metrics: Vec<Value> = (0..360)
        .map(|i| {
            let spike = (200..240).contains(&i);
            let bytes = if spike { 150.0 } else { 50.0 };
            json!({
                "timestamp": i as f64,
                "bytesPerSecond": bytes,
                "packetsPerSecond": 50.0 + (i % 3) as f64,
                "flowsPerSecond": 50.0 + (i % 5) as f64
            })
        })
        .collect();
    let response = run(json!({ "metrics": metrics }));
    let section = response.advanced_detection.multivariate.expect("multivariate present");
    assert!(!section.scores.is_empty());
    let top: HashSet<&str> = section.scores[0]
        .contributions
        .iter()
        .take(2)
        .map(|c| c.feature.as_str())
        .collect();
    assert!(top.contains("bytesPerSecond"));
}

#[test]
fn new_talker_and_alerts_fire_together() {
    let metrics: Vec<Value> = (0..200)
        .map(|i| {
            let mut tag_metrics = json!({
                "destination": {
                    "10.0.0.1": { "bytes": 100.0, "packets": 1.0 }
                }
            });
            if i >= 150 {
                tag_metrics["destination"]["10.0.0.99"] = json!({ "bytes": 5000.0, "packets": 5.0 });
            }
            json!({
                "timestamp": i as f64,
                "bytesPerSecond": 100.0,
                "tagMetrics": tag_metrics
            })
        })
        .collect();
    let response = run(json!({
        "metrics": metrics,
        "controls": {
            "disableDetectors": ["seasonality"],
            "alerts": { "scoreThreshold": 0.5 }
        }
    }));
    assert!(response.advanced_detection.seasonality.is_none());
    let talkers = response.advanced_detection.new_talkers.expect("new talkers present");
    assert!(talkers.talkers.iter().any(|t| t.tag_value == "10.0.0.99"));
    let alerts = response.advanced_detection.alerts.expect("alerts present");
    assert!(!alerts.events.is_empty());
    assert!(alerts
        .events
        .iter()
        .all(|e| response.advanced_detection.scores.iter().any(|s| s.detector == e.detector)));
}

#[test]
fn response_envelope_is_always_well_formed() {
    let response = run(json!({
        "metrics": [
            { "timestamp": 0.0, "bytesPerSecond": 5.0 },
            { "timestamp": 1.0, "bytesPerSecond": 5.0 },
            { "timestamp": 2.0, "bytesPerSecond": 5.0 }
        ]
    }));
    assert_eq!(response.baseline.len(), response.metrics.len());
    assert!(response.anomalies.is_empty());
    for cluster in &response.clusters {
        assert!(cluster.confidence >= 0.0 && cluster.confidence <= 1.0);
    }
}

#[test]
fn disabled_detector_params_do_not_persist_across_calls() {
    let pipeline = AnalyzerPipeline::new(Manifest::default_builtin());
    let metrics: Vec<Value> = (0..360)
        .map(|i| {
            let value = if i < 180 { 40.0 } else { 160.0 };
            json!({ "timestamp": i as f64, "bytesPerSecond": value })
        })
        .collect();

    let overridden = json!({
        "metrics": metrics.clone(),
        "controls": { "detectorParams": { "changepoint": { "thresholdStdDevs": 0.001 } } }
    });
    let request: Request = serde_json::from_value(overridden).unwrap();
    let first = pipeline.process(request).unwrap();
    let first_points = first.advanced_detection.change_points.map(|s| s.points.len()).unwrap_or(0);

    let plain = json!({ "metrics": metrics });
    let request: Request = serde_json::from_value(plain).unwrap();
    let second = pipeline.process(request).unwrap();
    let second_points = second.advanced_detection.change_points.map(|s| s.points.len()).unwrap_or(0);

    assert!(first_points > second_points);
}
