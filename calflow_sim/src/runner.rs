//! Scenario runner - pushes generated or recorded events through the pipeline.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use calflow_core::algorithms::standard_pipeline;
use calflow_core::Reconstruction;
use calflow_env::{DetectorSettings, EventRecord, EventSource, PipelineSettings};

use crate::error::SimError;
use crate::exporter::{EventFrame, PfoSummary, SimExport};
use crate::oracle::{GeneratedEvent, ShowerOracle};
use crate::scenarios::ScenarioId;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario name, or the input file for recorded events
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// No event failed and no invariant was violated
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub events: u64,

    /// Events whose loading or processing returned an error
    pub failed_events: u64,

    /// Events after which `check_invariants` failed
    pub invariant_violations: u64,

    pub hits: u64,
    pub tracks: u64,
    pub pfos: u64,
    pub charged_pfos: u64,
    pub neutral_pfos: u64,

    /// Truth counts (generated events only)
    pub true_charged: u64,
    pub true_neutral: u64,

    /// Neutral pfos beyond the number of true neutral particles
    pub spurious_neutrals: u64,

    pub true_energy: f64,
    pub reco_energy: f64,
}

impl ScenarioMetrics {
    /// Reconstructed over true energy; `None` without truth.
    pub fn energy_ratio(&self) -> Option<f64> {
        (self.true_energy > 0.0).then(|| self.reco_energy / self.true_energy)
    }
}

/// Runs scenarios through a configured reconstruction.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Events per scenario
    events: usize,

    settings: PipelineSettings,
}

impl ScenarioRunner {
    /// Creates a new scenario runner using the standard pipeline.
    pub fn new(seed: u64, events: usize) -> Self {
        Self {
            seed,
            events,
            settings: PipelineSettings {
                detector: DetectorSettings::default(),
                algorithms: standard_pipeline(),
            },
        }
    }

    /// Replaces the pipeline settings.
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Generates the events of `scenario`. Same seed, same events.
    pub fn generate(&self, scenario: ScenarioId) -> Vec<GeneratedEvent> {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracle = ShowerOracle::new(physics_seed);
        (0..self.events)
            .map(|_| {
                let particles = scenario.particles(&mut oracle);
                oracle.generate(&particles)
            })
            .collect()
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        self.run_generated(scenario, None)
    }

    /// Runs a scenario, recording every event into `export`.
    pub fn run_with_export(&self, scenario: ScenarioId, export: &mut SimExport) -> Result<ScenarioResult, SimError> {
        self.run_generated(scenario, Some(export))
    }

    fn run_generated(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let mut reco = self.reconstruction()?;
        let mut metrics = ScenarioMetrics::default();

        for event in self.generate(scenario) {
            let frame = self.process(&mut reco, &event.record, Some(&event), &mut metrics);
            if let Some(export) = export.as_deref_mut() {
                export.add_event(frame);
            }
        }
        Ok(self.finish(scenario.name(), metrics, export))
    }

    /// Runs every event of `source` (no truth available).
    pub fn run_source(
        &self,
        label: &str,
        source: &mut dyn EventSource,
        export: Option<&mut SimExport>,
    ) -> Result<ScenarioResult, SimError> {
        info!("Starting run over recorded events: {}", label);
        let mut reco = self.reconstruction()?;
        let mut metrics = ScenarioMetrics::default();
        let mut export = export;

        while let Some(record) = source.next_event()? {
            let frame = self.process(&mut reco, &record, None, &mut metrics);
            if let Some(export) = export.as_deref_mut() {
                export.add_event(frame);
            }
        }
        Ok(self.finish(label, metrics, export))
    }

    fn reconstruction(&self) -> Result<Reconstruction, SimError> {
        let mut reco = Reconstruction::new();
        reco.read_settings(&self.settings)?;
        Ok(reco)
    }

    /// Loads, reconstructs and checks one event, then resets the context.
    fn process(
        &self,
        reco: &mut Reconstruction,
        record: &EventRecord,
        truth: Option<&GeneratedEvent>,
        metrics: &mut ScenarioMetrics,
    ) -> EventFrame {
        metrics.events += 1;
        metrics.hits += record.calo_hits.len() as u64;
        metrics.tracks += record.tracks.len() as u64;

        let mut failure = None;
        if let Err(e) = reco.load_event(record).and_then(|_| reco.process_event()) {
            warn!(event = record.number, error = %e, "event failed");
            metrics.failed_events += 1;
            failure = Some(e.to_string());
        }
        if let Err(e) = reco.context().check_invariants() {
            error!(event = record.number, error = %e, "invariant violated");
            metrics.invariant_violations += 1;
            failure.get_or_insert(e.to_string());
        }

        let pfos = if failure.is_none() {
            summarize(reco)
        } else {
            Vec::new()
        };
        let charged = pfos.iter().filter(|p| p.charge != 0).count() as u64;
        let neutral = pfos.len() as u64 - charged;
        metrics.pfos += pfos.len() as u64;
        metrics.charged_pfos += charged;
        metrics.neutral_pfos += neutral;

        if let Some(event) = truth {
            metrics.true_charged += event.n_charged() as u64;
            metrics.true_neutral += event.n_neutral() as u64;
            metrics.spurious_neutrals += neutral.saturating_sub(event.n_neutral() as u64);
            metrics.true_energy += event.true_energy();
            metrics.reco_energy += pfos.iter().map(|p| p.energy).sum::<f64>();
        }

        debug!(
            event = record.number,
            n_hits = record.calo_hits.len(),
            n_pfos = pfos.len(),
            charged,
            neutral,
            "event reconstructed"
        );
        reco.reset();

        EventFrame {
            event: record.number,
            n_hits: record.calo_hits.len(),
            n_tracks: record.tracks.len(),
            truth: truth.map(|t| t.truth.clone()).unwrap_or_default(),
            pfos,
            error: failure,
        }
    }

    fn finish(&self, label: &str, metrics: ScenarioMetrics, export: Option<&mut SimExport>) -> ScenarioResult {
        let passed = metrics.failed_events == 0 && metrics.invariant_violations == 0;
        let failure_reason = (!passed).then(|| {
            format!(
                "{} of {} events failed, {} invariant violations",
                metrics.failed_events, metrics.events, metrics.invariant_violations
            )
        });
        if let Some(export) = export {
            export.finalize(passed, metrics.energy_ratio());
        }
        ScenarioResult {
            scenario: label.to_string(),
            seed: self.seed,
            passed,
            failure_reason,
            metrics,
        }
    }
}

fn summarize(reco: &Reconstruction) -> Vec<PfoSummary> {
    let registry = reco.context().registry();
    let pfos = match reco.particle_flow_objects() {
        Ok(pfos) => pfos,
        Err(_) => return Vec::new(),
    };
    pfos.into_iter()
        .map(|pfo| PfoSummary {
            particle_id: pfo.particle_id(),
            charge: pfo.charge(),
            energy: pfo.energy(),
            n_hits: pfo
                .clusters()
                .iter()
                .filter_map(|c| registry.cluster(*c).ok())
                .map(|c| c.n_hits())
                .sum(),
            n_tracks: pfo.tracks().len(),
        })
        .collect()
}
