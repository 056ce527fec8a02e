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

use thiserror::Error;

/// Fatal errors that abort a pipeline run before any detector has a chance
/// to produce output. Nothing a detector does past this point can surface
/// here — see [`DetectorError`] for the soft failure path.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid metric sample: {0}")]
    InvalidSample(String),
}

impl AnalyzerError {
    pub fn invalid_sample(message: impl Into<String>) -> Self {
        AnalyzerError::InvalidSample(message.into())
    }
}

/// Error raised by an auxiliary detector stage. The pipeline never lets
/// these abort a run; it folds them into a `detector-failure` component
/// score and a settings breadcrumb instead (see `Pipeline::process`).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DetectorError(pub String);

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        DetectorError(message.into())
    }
}
