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

//! Detector contract plus the five built-ins. Every detector is a stateless
//! value: it owns no history across calls, so per-request `detectorParams`
//! overrides live only in the [`DetectorInput`] passed to that one call and
//! never bleed into the next (§5 of the per-request isolation design).

pub mod change_point;
pub mod legacy;
pub mod multivariate;
pub mod new_talker;
pub mod seasonality;

pub use change_point::ChangePointDetector;
pub use legacy::LegacyAnomalyDetector;
pub use multivariate::MultivariateDetector;
pub use new_talker::NewTalkerDetector;
pub use seasonality::SeasonalityDetector;

use crate::context::{PartialResult, PipelineContext};
use crate::error::DetectorError;
use crate::model::{MetricSample, PacketRecord, Params, PayloadConfig};
use serde_json::Value;
use std::collections::HashMap;

/// Everything a detector needs for one call: the already-sorted, already
/// leniently-parsed metric samples (parsed once by the pipeline, not
/// re-parsed per detector), the raw packets, and this call's live settings
/// (manifest config shallow-merged with any `detectorParams` override).
pub struct DetectorInput<'a> {
    pub samples: &'a [MetricSample],
    pub packets: &'a [PacketRecord],
    pub payload_config: &'a PayloadConfig,
    pub params: &'a Params,
    pub settings: &'a HashMap<String, Value>,
}

impl<'a> DetectorInput<'a> {
    pub fn setting_f64(&self, key: &str, default: f64) -> f64 {
        self.settings.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn setting_usize(&self, key: &str, default: usize) -> usize {
        self.settings
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn setting_str(&self, key: &str, default: &str) -> String {
        self.settings
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }
}

/// A single detection stage. `run` returns the partial result to merge into
/// the shared context; it never calls `ctx.merge` itself (the pipeline owns
/// that boundary) but it may call `ctx.add_score` directly, since scoring
/// is cumulative, not a merge policy.
pub trait Detector {
    fn id(&self) -> &'static str;

    fn run(
        &self,
        input: &DetectorInput,
        ctx: &mut PipelineContext,
    ) -> Result<PartialResult, DetectorError>;
}
