//! Pipeline settings: which algorithms run, in which order, with which keys.
//!
//! Settings are plain JSON documents. The core only ever sees the key→value
//! pairs stored in each `AlgorithmConfig`; interpretation of the values is up
//! to the algorithm that reads them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::EnvError;

/// Detector description shared by every algorithm of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Solenoid field in Tesla (default: 4.0)
    pub b_field: f64,

    /// Number of pseudo-layers in the first calorimeter section (default: 30)
    pub first_section_layers: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            b_field: 4.0,
            first_section_layers: 30,
        }
    }
}

/// Configuration of one algorithm instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Registered factory type, e.g. "FragmentRemoval"
    #[serde(rename = "type")]
    pub algorithm_type: String,

    /// Optional instance label used in log output
    #[serde(default)]
    pub name: Option<String>,

    /// Free-form key→value settings read by the algorithm
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    /// Single daughter algorithms, keyed by role
    #[serde(default)]
    pub daughters: BTreeMap<String, AlgorithmConfig>,

    /// Ordered daughter algorithm lists, keyed by role
    #[serde(default)]
    pub daughter_lists: BTreeMap<String, Vec<AlgorithmConfig>>,
}

impl AlgorithmConfig {
    /// Creates a configuration with no parameters or daughters.
    pub fn new(algorithm_type: impl Into<String>) -> Self {
        Self {
            algorithm_type: algorithm_type.into(),
            ..Self::default()
        }
    }

    /// Builder: sets a parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Builder: sets a single daughter under `role`.
    pub fn with_daughter(mut self, role: impl Into<String>, daughter: AlgorithmConfig) -> Self {
        self.daughters.insert(role.into(), daughter);
        self
    }

    /// Builder: sets an ordered daughter list under `role`.
    pub fn with_daughter_list(
        mut self,
        role: impl Into<String>,
        daughters: Vec<AlgorithmConfig>,
    ) -> Self {
        self.daughter_lists.insert(role.into(), daughters);
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Label used when logging this instance.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.algorithm_type)
    }
}

/// Complete pipeline description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub detector: DetectorSettings,

    /// Top-level algorithms, run in order for every event
    #[serde(default)]
    pub algorithms: Vec<AlgorithmConfig>,
}

impl PipelineSettings {
    /// Parses settings from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, EnvError> {
        let settings: PipelineSettings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses a JSON settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EnvError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, EnvError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), EnvError> {
        if !(self.detector.b_field.is_finite() && self.detector.b_field >= 0.0) {
            return Err(EnvError::settings(format!(
                "b_field must be finite and non-negative, got {}",
                self.detector.b_field
            )));
        }
        fn check(config: &AlgorithmConfig) -> Result<(), EnvError> {
            if config.algorithm_type.is_empty() {
                return Err(EnvError::settings("algorithm without a type"));
            }
            config.daughters.values().try_for_each(check)?;
            config.daughter_lists.values().flatten().try_for_each(check)
        }
        self.algorithms.iter().try_for_each(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_settings() {
        let text = r#"{
            "detector": { "b_field": 3.5 },
            "algorithms": [
                {
                    "type": "ClusteringParent",
                    "parameters": { "ClusterListName": "Clusters" },
                    "daughters": {
                        "clustering": { "type": "ProximityClustering" }
                    }
                },
                { "type": "FragmentRemoval", "name": "late" }
            ]
        }"#;

        let settings = PipelineSettings::from_json_str(text).unwrap();
        assert_eq!(settings.detector.b_field, 3.5);
        assert_eq!(settings.detector.first_section_layers, 30);
        assert_eq!(settings.algorithms.len(), 2);

        let parent = &settings.algorithms[0];
        assert_eq!(parent.parameter("ClusterListName"), Some(&Value::from("Clusters")));
        assert_eq!(parent.daughters["clustering"].algorithm_type, "ProximityClustering");
        assert_eq!(settings.algorithms[1].label(), "late");
    }

    #[test]
    fn test_missing_type_rejected() {
        let text = r#"{ "algorithms": [ { "type": "A", "daughters": { "x": { "type": "" } } } ] }"#;
        assert!(matches!(
            PipelineSettings::from_json_str(text),
            Err(EnvError::SettingsError(_))
        ));
    }

    #[test]
    fn test_round_trip_through_json() {
        let settings = PipelineSettings {
            detector: DetectorSettings::default(),
            algorithms: vec![AlgorithmConfig::new("PfoCreation").with_parameter("OutputPfoListName", "Pfos")],
        };
        let text = settings.to_json_string().unwrap();
        assert_eq!(PipelineSettings::from_json_str(&text).unwrap(), settings);
    }
}
