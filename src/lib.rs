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

//! Registry-driven anomaly-analysis pipeline for bounded windows of
//! network-telemetry samples. The library only emits `tracing`
//! spans/events — it never installs a global subscriber, so embedding
//! applications keep control of that (see `bin/flowsentry` for the
//! reference wiring).

pub mod alerts;
pub mod context;
pub mod detectors;
pub mod error;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod stats;
pub mod timestamp;

pub use context::PipelineContext;
pub use error::{AnalyzerError, DetectorError};
pub use manifest::Manifest;
pub use model::{Request, Response};
pub use pipeline::AnalyzerPipeline;
