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

//! Score-threshold-driven alert synthesis, run once after every detector
//! has contributed to `PipelineContext.scores`.

use crate::context::PipelineContext;
use crate::model::{AlertEvent, AlertsConfig};
use crate::timestamp::Timestamp;

/// Emits one alert event per component score at or above the configured
/// threshold. Every event shares the wall-clock timestamp taken when this
/// function runs — the pipeline reads the clock once here, not once per
/// event, so a burst of qualifying scores reads as one coherent moment.
pub fn evaluate_alerts(ctx: &mut PipelineContext, config: AlertsConfig) {
    let threshold = config.threshold();
    let now = Timestamp::now();
    let scores: Vec<_> = ctx.scores.clone();

    for score in scores {
        if score.score < threshold {
            continue;
        }
        let severity = if score.score >= threshold + 0.2 { "critical" } else { "warning" };
        let message = format!(
            "{} scored {:.2}, at or above the {:.2} alert threshold",
            score.detector, score.score, threshold
        );
        ctx.push_alert(AlertEvent {
            id: format!("alert-{}", uuid::Uuid::new_v4()),
            timestamp: now,
            detector: score.detector.clone(),
            score: score.score,
            destinations: config.destinations.clone(),
            severity: severity.to_string(),
            message,
        });
    }

    ctx.set_alerts_config(config);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentScore;

    #[test]
    fn emits_critical_above_threshold_plus_point_two() {
        let mut ctx = PipelineContext::new();
        ctx.scores.push(ComponentScore {
            detector: "newtalker".to_string(),
            score: 0.95,
            weight: None,
            label: None,
            reasons: vec![],
        });
        evaluate_alerts(
            &mut ctx,
            AlertsConfig { score_threshold: Some(0.5), destinations: vec!["ops".to_string()] },
        );
        assert_eq!(ctx.alert_events.len(), 1);
        assert_eq!(ctx.alert_events[0].severity, "critical");
    }

    #[test]
    fn skips_scores_below_threshold() {
        let mut ctx = PipelineContext::new();
        ctx.scores.push(ComponentScore {
            detector: "legacy".to_string(),
            score: 0.2,
            weight: None,
            label: None,
            reasons: vec![],
        });
        evaluate_alerts(&mut ctx, AlertsConfig { score_threshold: Some(0.9), destinations: vec![] });
        assert!(ctx.alert_events.is_empty());
    }
}
