//! Host-facing driver: settings in, events in, particle flow objects out.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::{PfError, PfResult};
use crate::list_store::INPUT_LIST_NAME;
use crate::objects::{CaloHitId, CaloHitParameters, Pfo, TrackId, TrackParameters};
use calflow_env::{DetectorSettings, EventRecord, PipelineSettings, TrackRelation};

/// Owns the algorithm pipeline and the event context it runs on.
///
/// Per event: [`load_event`](Self::load_event), then
/// [`process_event`](Self::process_event), then read
/// [`particle_flow_objects`](Self::particle_flow_objects), then
/// [`reset`](Self::reset).
pub struct Reconstruction {
    factory: AlgorithmFactory,
    algorithms: Vec<Box<dyn Algorithm>>,
    ctx: EventContext,
    events_processed: u64,
}

impl Default for Reconstruction {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconstruction {
    /// Empty pipeline with every built-in algorithm type registered.
    pub fn new() -> Self {
        Self::with_factory(AlgorithmFactory::with_builtin())
    }

    pub fn with_factory(factory: AlgorithmFactory) -> Self {
        Self {
            factory,
            algorithms: Vec::new(),
            ctx: EventContext::new(DetectorSettings::default()),
            events_processed: 0,
        }
    }

    /// Registers an additional algorithm type.
    pub fn register_algorithm<F>(&mut self, type_name: &str, constructor: F) -> PfResult<()>
    where
        F: Fn() -> Box<dyn Algorithm> + 'static,
    {
        self.factory.register(type_name, constructor)
    }

    pub fn factory(&self) -> &AlgorithmFactory {
        &self.factory
    }

    /// Builds the pipeline described by `settings`, replacing the current one.
    /// On error the previous pipeline is kept.
    pub fn read_settings(&mut self, settings: &PipelineSettings) -> PfResult<()> {
        let algorithms = settings
            .algorithms
            .iter()
            .map(|config| self.factory.create(config))
            .collect::<PfResult<Vec<_>>>()?;
        info!(
            n_algorithms = algorithms.len(),
            b_field = settings.detector.b_field,
            "pipeline configured"
        );
        self.algorithms = algorithms;
        self.ctx.set_detector(settings.detector.clone());
        Ok(())
    }

    /// Appends an already configured algorithm to the pipeline.
    pub fn add_algorithm(&mut self, algorithm: Box<dyn Algorithm>) {
        self.algorithms.push(algorithm);
    }

    pub fn n_algorithms(&self) -> usize {
        self.algorithms.len()
    }

    pub fn context(&self) -> &EventContext {
        &self.ctx
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Creates the hits, tracks and track relations of `event`.
    ///
    /// The context must be empty; call [`reset`](Self::reset) between events.
    pub fn load_event(&mut self, event: &EventRecord) -> PfResult<()> {
        let registry = self.ctx.registry();
        if registry.n_calo_hits() > 0 || registry.n_tracks() > 0 {
            return Err(PfError::not_allowed("event already loaded, reset first"));
        }

        for record in &event.calo_hits {
            self.ctx.create_calo_hit(CaloHitParameters::from(record))?;
        }

        let mut tracks: HashMap<u64, TrackId> = HashMap::new();
        for record in &event.tracks {
            if tracks.contains_key(&record.id) {
                return Err(PfError::invalid(format!("duplicate track id {}", record.id)));
            }
            let id = self.ctx.create_track(TrackParameters::from(record))?;
            tracks.insert(record.id, id);
        }

        let lookup = |id: u64| {
            tracks
                .get(&id)
                .copied()
                .ok_or_else(|| PfError::not_found(format!("relation references unknown track {}", id)))
        };
        for relation in &event.relations {
            match *relation {
                TrackRelation::ParentDaughter(parent, daughter) => {
                    self.ctx.set_track_parent_daughter(lookup(parent)?, lookup(daughter)?)?;
                }
                TrackRelation::Siblings(a, b) => {
                    self.ctx.set_track_siblings(lookup(a)?, lookup(b)?)?;
                }
            }
        }

        debug!(
            event = event.number,
            n_hits = event.calo_hits.len(),
            n_tracks = event.tracks.len(),
            "event loaded"
        );
        Ok(())
    }

    /// Orders the input hits by layer (then decreasing energy) and runs the
    /// pipeline. Stops at, and returns, the first algorithm error.
    pub fn process_event(&mut self) -> PfResult<()> {
        self.order_input_hits()?;
        for algorithm in self.algorithms.iter_mut() {
            self.ctx.run_algorithm(algorithm.as_mut())?;
        }
        self.events_processed += 1;
        Ok(())
    }

    fn order_input_hits(&mut self) -> PfResult<()> {
        let keys: HashMap<CaloHitId, (u32, f64)> = self
            .ctx
            .registry
            .calo_hits()
            .map(|(id, hit)| (id, (hit.layer(), hit.input_energy())))
            .collect();
        self.ctx.calo_hit_lists.sort_list_by(INPUT_LIST_NAME, |a, b| {
            let (la, ea) = keys.get(a).copied().unwrap_or((u32::MAX, 0.0));
            let (lb, eb) = keys.get(b).copied().unwrap_or((u32::MAX, 0.0));
            la.cmp(&lb).then(eb.total_cmp(&ea))
        })
    }

    /// Pfos of the current pfo list.
    pub fn particle_flow_objects(&self) -> PfResult<Vec<&Pfo>> {
        let registry = self.ctx.registry();
        self.ctx
            .pfo_lists()
            .current()?
            .0
            .iter()
            .map(|id| registry.pfo(*id))
            .collect()
    }

    /// Releases the event; the pipeline is kept.
    pub fn reset(&mut self) {
        self.ctx.begin_event();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::FnAlgorithm;
    use crate::algorithms::standard_pipeline;
    use crate::list_store::AlgorithmId;
    use calflow_env::{AlgorithmConfig, CaloHitRecord, HitKind, TrackRecord};

    fn hit(layer: u32, x: f64, y: f64, energy: f64) -> CaloHitRecord {
        CaloHitRecord {
            position: [x, y, 0.0],
            expected_direction: [1.0, 0.0, 0.0],
            cell_size: 45.0,
            input_energy: energy,
            em_energy: 0.3 * energy,
            hadronic_energy: energy,
            mip_equivalent_energy: 40.0 * energy,
            layer,
            kind: HitKind::Hcal,
            time: 0.0,
        }
    }

    fn track(id: u64, momentum: f64) -> TrackRecord {
        TrackRecord {
            id,
            d0: 0.0,
            z0: 0.0,
            charge: 1,
            mass: 0.0,
            momentum_at_dca: [momentum, 0.0, 0.0],
            calorimeter_position: [1990.0, 0.0, 0.0],
            calorimeter_momentum: [momentum, 0.0, 0.0],
            reaches_calorimeter: true,
            can_form_pfo: true,
        }
    }

    /// A 5 GeV charged shower with a fragment running alongside, and a
    /// neutral shower far away.
    fn event() -> EventRecord {
        let mut event = EventRecord::new(7);
        for k in 0..6u32 {
            event.calo_hits.push(hit(40 + k, 2000.0 + 25.0 * k as f64, 0.0, 5.0 / 6.0));
            event.calo_hits.push(hit(40 + k, 2000.0 + 25.0 * k as f64, 900.0, 0.5));
        }
        for k in 0..5u32 {
            event.calo_hits.push(hit(41 + k, 2025.0 + 25.0 * k as f64, 85.0, 0.05));
        }
        event.tracks.push(track(1, 5.1));
        event
    }

    #[test]
    fn test_standard_pipeline_end_to_end() {
        let mut reco = Reconstruction::new();
        let settings = PipelineSettings {
            detector: DetectorSettings::default(),
            algorithms: standard_pipeline(),
        };
        reco.read_settings(&settings).unwrap();
        assert_eq!(reco.n_algorithms(), 4);

        reco.load_event(&event()).unwrap();
        reco.process_event().unwrap();
        reco.context().check_invariants().unwrap();

        let pfos = reco.particle_flow_objects().unwrap();
        let charged: Vec<_> = pfos.iter().filter(|p| p.charge() != 0).collect();
        assert_eq!(charged.len(), 1);
        assert_eq!(pfos.len(), 2);

        // The fragment was merged into the charged shower.
        let registry = reco.context().registry();
        let cluster = charged[0].clusters().iter().next().copied().unwrap();
        assert_eq!(registry.cluster(cluster).unwrap().n_hits(), 11);
        assert_eq!(reco.events_processed(), 1);

        reco.reset();
        assert_eq!(reco.context().registry().n_calo_hits(), 0);
        reco.load_event(&event()).unwrap();
    }

    #[test]
    fn test_load_requires_reset() {
        let mut reco = Reconstruction::new();
        reco.load_event(&event()).unwrap();
        assert!(matches!(reco.load_event(&event()), Err(PfError::NotAllowed(_))));
    }

    #[test]
    fn test_relations_resolved() {
        let mut reco = Reconstruction::new();
        let mut record = event();
        record.tracks.push(track(2, 1.0));
        record.relations.push(TrackRelation::ParentDaughter(1, 2));
        reco.load_event(&record).unwrap();

        let registry = reco.context().registry();
        let (_, daughter) = registry.tracks().find(|(_, t)| !t.parents().is_empty()).unwrap();
        assert_eq!(daughter.parents().len(), 1);

        let mut bad = event();
        bad.relations.push(TrackRelation::Siblings(1, 99));
        reco.reset();
        assert!(matches!(reco.load_event(&bad), Err(PfError::NotFound(_))));
    }

    #[test]
    fn test_unknown_algorithm_keeps_previous_pipeline() {
        let mut reco = Reconstruction::new();
        reco.add_algorithm(Box::new(FnAlgorithm::new("Noop", |_: &mut EventContext, _: AlgorithmId| Ok(()))));
        let settings = PipelineSettings {
            detector: DetectorSettings::default(),
            algorithms: vec![AlgorithmConfig::new("Missing")],
        };
        assert!(matches!(reco.read_settings(&settings), Err(PfError::NotFound(_))));
        assert_eq!(reco.n_algorithms(), 1);
    }

    #[test]
    fn test_input_hits_ordered_by_layer_then_energy() {
        let mut reco = Reconstruction::new();
        let mut record = EventRecord::new(1);
        record.calo_hits.push(hit(5, 0.0, 0.0, 1.0));
        record.calo_hits.push(hit(2, 0.0, 0.0, 1.0));
        record.calo_hits.push(hit(2, 0.0, 0.0, 3.0));
        reco.load_event(&record).unwrap();
        reco.process_event().unwrap();

        let registry = reco.context().registry();
        let ordered: Vec<(u32, f64)> = reco
            .context()
            .calo_hit_lists()
            .list(INPUT_LIST_NAME)
            .unwrap()
            .iter()
            .map(|id| {
                let h = registry.calo_hit(*id).unwrap();
                (h.layer(), h.input_energy())
            })
            .collect();
        assert_eq!(ordered, vec![(2, 3.0), (2, 1.0), (5, 1.0)]);
    }

    #[test]
    fn test_failing_algorithm_stops_pipeline() {
        let mut reco = Reconstruction::new();
        reco.add_algorithm(Box::new(FnAlgorithm::new("Fails", |_: &mut EventContext, _: AlgorithmId| {
            Err(PfError::failure("no luck"))
        })));
        reco.load_event(&event()).unwrap();
        assert!(matches!(reco.process_event(), Err(PfError::Failure(_))));
        assert_eq!(reco.events_processed(), 0);
        reco.context().check_invariants().unwrap();
    }
}
