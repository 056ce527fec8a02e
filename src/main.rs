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

//! Thin stdin/stdout JSON transport around the pipeline. Framing,
//! streaming and batching live outside this crate's scope; this binary
//! exists so the crate is directly runnable for one-shot invocations.

use flowsentry_analyzer::{AnalyzerError, AnalyzerPipeline, Manifest, Request};
use std::io::{self, Read, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut raw = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut raw) {
        eprintln!("failed to read request from stdin: {err}");
        return ExitCode::FAILURE;
    }

    let request: Request = match serde_json::from_str(&raw) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("invalid request: {err}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = AnalyzerPipeline::new(Manifest::default_builtin());
    match pipeline.process(request) {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(json) => {
                if let Err(err) = io::stdout().write_all(json.as_bytes()) {
                    eprintln!("failed to write response: {err}");
                    return ExitCode::FAILURE;
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to serialize response: {err}");
                ExitCode::FAILURE
            }
        },
        Err(AnalyzerError::InvalidRequest(message)) | Err(AnalyzerError::InvalidSample(message)) => {
            eprintln!("invalid request: {message}");
            ExitCode::FAILURE
        }
    }
}
