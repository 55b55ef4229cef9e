//! JSON exporter for offline inspection.
//!
//! Exports per-event reconstruction summaries alongside the generated truth.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

use crate::oracle::TrueParticle;

/// One reconstructed particle flow object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PfoSummary {
    pub particle_id: i32,
    pub charge: i32,
    pub energy: f64,

    /// Hits in the pfo's clusters
    pub n_hits: usize,

    pub n_tracks: usize,
}

/// A single event of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event number
    pub event: u64,

    pub n_hits: usize,
    pub n_tracks: usize,

    /// Generated particles (empty for events read from file)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub truth: Vec<TrueParticle>,

    /// Reconstructed output
    pub pfos: Vec<PfoSummary>,

    /// Processing or invariant failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// All events
    pub events: Vec<EventFrame>,

    /// Final results
    pub passed: bool,

    /// Reconstructed over true energy, if truth was available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_ratio: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            events: Vec::new(),
            passed: false,
            energy_ratio: None,
        }
    }

    /// Adds an event.
    pub fn add_event(&mut self, frame: EventFrame) {
        self.events.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, energy_ratio: Option<f64>) {
        self.passed = passed;
        self.energy_ratio = energy_ratio;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_serializes_without_empty_fields() {
        let mut export = SimExport::new("single_charged", 42);
        export.add_event(EventFrame {
            event: 0,
            n_hits: 30,
            n_tracks: 1,
            truth: Vec::new(),
            pfos: vec![PfoSummary {
                particle_id: 211,
                charge: 1,
                energy: 10.0,
                n_hits: 30,
                n_tracks: 1,
            }],
            error: None,
        });
        export.finalize(true, None);

        let json = serde_json::to_string(&export).unwrap();
        assert!(!json.contains("truth"));
        assert!(!json.contains("error"));
        assert!(!json.contains("energy_ratio"));

        let back: SimExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.events.len(), 1);
        assert_eq!(back.events[0].pfos[0].particle_id, 211);
        assert!(back.passed);
    }
}
