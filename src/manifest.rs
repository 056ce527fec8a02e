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

//! Declarative detector registry config. The manifest names ids and a
//! resolver key the pipeline looks up in its compile-time registry table
//! (`pipeline::resolve`); it never carries source symbols.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorEntry {
    pub id: String,
    pub resolver: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    pub version: String,
    pub detectors: Vec<DetectorEntry>,
}

impl Manifest {
    /// Deserializes an externally-sourced JSON manifest. A missing or
    /// malformed document degrades to the empty manifest rather than
    /// propagating a parse error, matching the reference loader's
    /// `{"version": "0", "detectors": []}` fallback.
    pub fn load_str(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Manifest::empty())
    }

    pub fn empty() -> Self {
        Manifest {
            version: "0".to_string(),
            detectors: Vec::new(),
        }
    }

    /// The built-in manifest: all five detectors enabled in canonical
    /// order with their documented defaults.
    pub fn default_builtin() -> Self {
        Manifest {
            version: "1".to_string(),
            detectors: vec![
                DetectorEntry {
                    id: "legacy".to_string(),
                    resolver: "legacy".to_string(),
                    enabled: true,
                    config: HashMap::new(),
                },
                DetectorEntry {
                    id: "seasonality".to_string(),
                    resolver: "seasonality".to_string(),
                    enabled: true,
                    config: HashMap::new(),
                },
                DetectorEntry {
                    id: "changepoint".to_string(),
                    resolver: "changepoint".to_string(),
                    enabled: true,
                    config: HashMap::new(),
                },
                DetectorEntry {
                    id: "multivariate".to_string(),
                    resolver: "multivariate".to_string(),
                    enabled: true,
                    config: HashMap::new(),
                },
                DetectorEntry {
                    id: "newtalker".to_string(),
                    resolver: "newtalker".to_string(),
                    enabled: true,
                    config: HashMap::new(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builtin_enables_all_five_in_order() {
        let manifest = Manifest::default_builtin();
        let ids: Vec<&str> = manifest.detectors.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["legacy", "seasonality", "changepoint", "multivariate", "newtalker"]);
        assert!(manifest.detectors.iter().all(|d| d.enabled));
    }

    #[test]
    fn malformed_json_degrades_to_empty_manifest() {
        let manifest = Manifest::load_str("not json");
        assert!(manifest.detectors.is_empty());
        assert_eq!(manifest.version, "0");
    }

    #[test]
    fn empty_string_degrades_to_empty_manifest() {
        let manifest = Manifest::load_str("");
        assert!(manifest.detectors.is_empty());
    }
}
