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

//! First-appearance tracking per tag class. A tag-value that shows up
//! late in the window with a meaningful byte total, or that has only ever
//! appeared once, is surfaced as a "new talker" and ranked by how much it
//! shifts the class's byte-distribution entropy.

use super::{Detector, DetectorInput};
use crate::context::{PartialResult, PipelineContext};
use crate::error::DetectorError;
use crate::model::{NewTalker, NewTalkerDiagnostics};
use crate::stats;
use crate::timestamp::Timestamp;
use std::collections::{HashMap, HashSet};

pub struct NewTalkerDetector;

impl NewTalkerDetector {
    pub fn new() -> Self {
        NewTalkerDetector
    }
}

impl Default for NewTalkerDetector {
    fn default() -> Self {
        Self::new()
    }
}

const TAG_CLASSES: [&str; 3] = ["destination", "process", "port"];

struct TagTotals {
    first_seen: f64,
    last_seen: f64,
    total_bytes: f64,
    windows_seen: HashSet<usize>,
}

impl Detector for NewTalkerDetector {
    fn id(&self) -> &'static str {
        "newtalker"
    }

    fn run(
        &self,
        input: &DetectorInput,
        ctx: &mut PipelineContext,
    ) -> Result<PartialResult, DetectorError> {
        if input.samples.is_empty() {
            ctx.add_score(self.id(), 0.0, Some("newtalker"), &["newtalker.insufficient-data".to_string()]);
            return Ok(PartialResult::NewTalkers {
                talkers: vec![],
                diagnostics: NewTalkerDiagnostics { reasons: vec!["newtalker.insufficient-data".to_string()] },
            });
        }

        let recent_window_seconds = input.setting_f64("recentWindowSeconds", 180.0);
        let min_bytes = input.setting_f64("minBytes", 2048.0);
        let max_entries = input.setting_usize("maxEntries", 10);
        let series_end = input
            .samples
            .last()
            .map(|s| s.timestamp.as_seconds())
            .unwrap_or(0.0);
        let recent_cutoff = series_end - recent_window_seconds;

        let mut per_class: HashMap<&str, HashMap<String, TagTotals>> = HashMap::new();

        for (window_idx, sample) in input.samples.iter().enumerate() {
            for tag_class in TAG_CLASSES {
                let Some(values) = sample.tag_metrics.get(tag_class) else { continue };
                let class_map = per_class.entry(tag_class).or_default();
                for (tag_value, stat) in values {
                    let ts = sample.timestamp.as_seconds();
                    let entry = class_map.entry(tag_value.clone()).or_insert_with(|| TagTotals {
                        first_seen: ts,
                        last_seen: ts,
                        total_bytes: 0.0,
                        windows_seen: HashSet::new(),
                    });
                    entry.first_seen = entry.first_seen.min(ts);
                    entry.last_seen = entry.last_seen.max(ts);
                    entry.total_bytes += stat.bytes;
                    entry.windows_seen.insert(window_idx);
                }
            }
        }

        let mut qualifiers: Vec<NewTalker> = Vec::new();

        for (tag_class, class_map) in &per_class {
            let totals: Vec<f64> = class_map.values().map(|t| t.total_bytes).collect();
            let base_entropy = stats::shannon_entropy_base2(&totals);

            for (tag_value, totals_entry) in class_map {
                let unique_windows = totals_entry.windows_seen.len();
                let qualifies = totals_entry.total_bytes >= min_bytes
                    && (totals_entry.first_seen >= recent_cutoff || unique_windows <= 1);
                if !qualifies {
                    continue;
                }

                let without_candidate: Vec<f64> = class_map
                    .iter()
                    .filter(|(value, _)| *value != tag_value)
                    .map(|(_, t)| t.total_bytes)
                    .collect();
                let entropy_without = stats::shannon_entropy_base2(&without_candidate);
                let entropy_delta = base_entropy - entropy_without;

                qualifiers.push(NewTalker {
                    id: format!("newtalker-{}", uuid::Uuid::new_v4()),
                    tag_type: tag_class.to_string(),
                    tag_value: tag_value.clone(),
                    first_seen: Timestamp::from_seconds(totals_entry.first_seen),
                    last_seen: Timestamp::from_seconds(totals_entry.last_seen),
                    total_bytes: totals_entry.total_bytes,
                    samples: unique_windows,
                    entropy_delta,
                });
            }
        }

        qualifiers.sort_by(|a, b| {
            a.first_seen
                .partial_cmp(&b.first_seen)
                .unwrap()
                .then(b.total_bytes.partial_cmp(&a.total_bytes).unwrap())
        });
        qualifiers.truncate(max_entries);

        let component_score = (qualifiers.len() as f64 / max_entries as f64).min(1.0);
        ctx.add_score(self.id(), component_score, Some("newtalker"), &[]);

        Ok(PartialResult::NewTalkers {
            talkers: qualifiers,
            diagnostics: NewTalkerDiagnostics { reasons: vec![] },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricSample, Params, PayloadConfig, TagStat};

    fn samples_with_late_talker(n: usize, new_talker_at: usize) -> Vec<MetricSample> {
        (0..n)
            .map(|i| {
                let mut tag_metrics = HashMap::new();
                let mut destinations = HashMap::new();
                destinations.insert("10.0.0.1".to_string(), TagStat { bytes: 100.0, packets: 1.0 });
                if i >= new_talker_at {
                    destinations.insert("10.0.0.99".to_string(), TagStat { bytes: 5000.0, packets: 5.0 });
                }
                tag_metrics.insert("destination".to_string(), destinations);
                MetricSample {
                    timestamp: Timestamp::from_seconds(i as f64),
                    window: None,
                    bytes_per_second: 100.0,
                    packets_per_second: 10.0,
                    flows_per_second: 1.0,
                    protocol_histogram: HashMap::new(),
                    tag_metrics,
                }
            })
            .collect()
    }

    #[test]
    fn surfaces_a_tag_first_seen_late_in_the_window() {
        let samples = samples_with_late_talker(200, 150);
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
        let detector = NewTalkerDetector::new();
        let partial = detector.run(&input, &mut ctx).unwrap();
        match partial {
            PartialResult::NewTalkers { talkers, .. } => {
                assert!(talkers.iter().any(|t| t.tag_value == "10.0.0.99"));
            }
            _ => panic!("expected new-talker partial"),
        }
    }
}
