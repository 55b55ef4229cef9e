//! Greedy removal of calorimeter fragments.
//!
//! Small track-less "daughter" clusters are merged, one at a time, into the
//! track-associated "parent" they most plausibly split off from. Each round:
//!
//! 1. **Scan**: contacts are measured for daughters that are new or were
//!    touched by the previous merge, against every parent. Every other
//!    daughter is remeasured against the parent that just grew.
//! 2. **Preselect**: daughters whose merge cannot improve (or keep within
//!    tolerance) any parent's track/cluster energy agreement are skipped.
//! 3. **Score**: evidence minus required evidence for every remaining contact.
//! 4. **Merge or halt**: the single best positive margin is merged; otherwise
//!    the engine stops.
//!
//! Each merge removes one cluster, so the loop ends after at most
//! `n_clusters - 1` rounds.

mod config;
mod contact;
mod evidence;

pub use config::FragmentRemovalConfig;
pub use contact::ClusterContact;
pub use evidence::{passes_preselection, required_evidence, MergeEvidence};

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::PfResult;
use crate::list_store::AlgorithmId;
use crate::objects::ClusterId;
use crate::registry::Registry;
use calflow_env::{AlgorithmConfig, DetectorSettings};

/// One accepted merge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeRecord {
    pub parent: ClusterId,
    pub daughter: ClusterId,
    pub evidence: f64,
    pub required_evidence: f64,
}

impl MergeRecord {
    pub fn margin(&self) -> f64 {
        self.evidence - self.required_evidence
    }
}

/// Contact map plus the clusters touched by the last merge.
#[derive(Debug, Clone, Default)]
pub struct FragmentRemovalEngine {
    config: FragmentRemovalConfig,

    /// Contacts that survived the pre-filter, keyed by daughter
    contacts: BTreeMap<ClusterId, Vec<ClusterContact>>,

    /// Daughters to rescan fully and parents to remeasure; `None` until the
    /// first scan, which covers every daughter
    affected: Option<BTreeSet<ClusterId>>,

    /// Daughters measured at least once
    scanned: BTreeSet<ClusterId>,
}

impl FragmentRemovalEngine {
    pub fn new(config: FragmentRemovalConfig) -> Self {
        Self {
            config,
            contacts: BTreeMap::new(),
            affected: None,
            scanned: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &FragmentRemovalConfig {
        &self.config
    }

    pub fn contact_map(&self) -> &BTreeMap<ClusterId, Vec<ClusterContact>> {
        &self.contacts
    }

    /// Forgets the contact map; the next step rescans everything.
    pub fn reset(&mut self) {
        self.contacts.clear();
        self.affected = None;
        self.scanned.clear();
    }

    /// Merges fragments in the current cluster list until no merge is accepted.
    pub fn run(&mut self, ctx: &mut EventContext) -> PfResult<Vec<MergeRecord>> {
        let mut merges = Vec::new();
        while let Some(record) = self.step(ctx)? {
            merges.push(record);
        }
        Ok(merges)
    }

    /// Runs one scan/score round and performs its best merge, if any.
    pub fn step(&mut self, ctx: &mut EventContext) -> PfResult<Option<MergeRecord>> {
        let clusters = ctx.current_clusters()?;
        let detector = ctx.detector().clone();
        self.scan(ctx.registry(), &clusters, &detector)?;

        let Some(best) = self.best_merge(ctx.registry(), &detector)? else {
            return Ok(None);
        };

        self.affected = Some(self.affected_by(&best));
        self.contacts.remove(&best.daughter);
        ctx.merge_and_delete_clusters(best.parent, best.daughter)?;
        debug!(
            parent = %best.parent,
            daughter = %best.daughter,
            evidence = best.evidence,
            required = best.required_evidence,
            "merged fragment"
        );
        Ok(Some(best))
    }

    fn classify(&self, registry: &Registry, clusters: &[ClusterId]) -> PfResult<(Vec<ClusterId>, BTreeSet<ClusterId>)> {
        let mut parents = Vec::new();
        let mut daughters = BTreeSet::new();
        for &id in clusters {
            let cluster = registry.cluster(id)?;
            if !cluster.is_available() {
                continue;
            }
            if !cluster.associated_tracks().is_empty() {
                parents.push(id);
            } else if cluster.n_hits() >= self.config.min_daughter_hits
                && cluster.hadronic_energy() >= self.config.min_daughter_hadronic_energy
            {
                daughters.insert(id);
            }
        }
        Ok((parents, daughters))
    }

    fn scan(&mut self, registry: &Registry, clusters: &[ClusterId], detector: &DetectorSettings) -> PfResult<()> {
        let (parents, daughters) = self.classify(registry, clusters)?;

        let (full, grown): (BTreeSet<ClusterId>, BTreeSet<ClusterId>) = match self.affected.replace(BTreeSet::new()) {
            None => {
                self.contacts.clear();
                self.scanned.clear();
                (daughters.clone(), BTreeSet::new())
            }
            Some(affected) => (
                daughters
                    .iter()
                    .filter(|d| affected.contains(d) || !self.scanned.contains(d))
                    .copied()
                    .collect(),
                parents.iter().filter(|p| affected.contains(p)).copied().collect(),
            ),
        };
        self.scanned.extend(full.iter().copied());

        let parent_set: BTreeSet<ClusterId> = parents.iter().copied().collect();
        self.contacts.retain(|daughter, row| {
            row.retain(|c| parent_set.contains(&c.parent()));
            daughters.contains(daughter) && !row.is_empty()
        });

        for &daughter in &daughters {
            let rescan = full.contains(&daughter);
            if !rescan && grown.is_empty() {
                continue;
            }
            let inner = registry.cluster(daughter)?.inner_layer().unwrap_or(0);
            let mut previous = self.contacts.remove(&daughter).unwrap_or_default();

            // Row order follows the parent list.
            let mut row = Vec::new();
            for &parent in &parents {
                if !rescan && !grown.contains(&parent) {
                    if let Some(pos) = previous.iter().position(|c| c.parent() == parent) {
                        row.push(previous.swap_remove(pos));
                    }
                    continue;
                }
                let contact = ClusterContact::new(registry, daughter, parent, &self.config, detector.b_field)?;
                if contact.passes_prefilter(inner, detector.first_section_layers, &self.config) {
                    row.push(contact);
                }
            }
            if !row.is_empty() {
                self.contacts.insert(daughter, row);
            }
        }
        Ok(())
    }

    fn best_merge(&self, registry: &Registry, detector: &DetectorSettings) -> PfResult<Option<MergeRecord>> {
        let mut best: Option<MergeRecord> = None;

        for (&daughter_id, row) in &self.contacts {
            let daughter = registry.cluster(daughter_id)?;
            if !passes_preselection(daughter.hadronic_energy(), row, &self.config)? {
                continue;
            }
            let in_first_section = daughter
                .inner_layer()
                .is_some_and(|layer| layer < detector.first_section_layers);

            for contact in row {
                if contact.parent_track_energy() <= 0.0 {
                    continue;
                }
                let parent = registry.cluster(contact.parent())?;
                let evidence = MergeEvidence::new(contact, in_first_section, &self.config).total(&self.config);
                let required = required_evidence(contact, daughter, parent, &self.config, detector.first_section_layers)?;
                let candidate = MergeRecord {
                    parent: contact.parent(),
                    daughter: daughter_id,
                    evidence,
                    required_evidence: required,
                };
                if candidate.margin() > 0.0 && best.map_or(true, |b| candidate.margin() > b.margin()) {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// The grown parent, and daughters whose row referenced either merged
    /// cluster. Every daughter is remeasured against the grown parent.
    fn affected_by(&self, merge: &MergeRecord) -> BTreeSet<ClusterId> {
        let mut affected = BTreeSet::from([merge.parent]);
        for (&daughter, row) in &self.contacts {
            if daughter == merge.daughter {
                continue;
            }
            if row.iter().any(|c| c.parent() == merge.parent || c.parent() == merge.daughter) {
                affected.insert(daughter);
            }
        }
        affected
    }
}

/// Pipeline step wrapping [`FragmentRemovalEngine`] over the current cluster list.
#[derive(Debug, Default)]
pub struct FragmentRemoval {
    config: FragmentRemovalConfig,
}

impl FragmentRemoval {
    pub fn new(config: FragmentRemovalConfig) -> Self {
        Self { config }
    }
}

impl Algorithm for FragmentRemoval {
    fn type_name(&self) -> &str {
        "FragmentRemoval"
    }

    fn read_settings(&mut self, config: &AlgorithmConfig, _factory: &AlgorithmFactory) -> PfResult<()> {
        self.config.read_settings(config)
    }

    fn run(&mut self, ctx: &mut EventContext, _id: AlgorithmId) -> PfResult<()> {
        let before = ctx.current_clusters()?.len();
        let mut engine = FragmentRemovalEngine::new(self.config.clone());
        let merges = engine.run(ctx)?;
        debug!(clusters = before, merges = merges.len(), "fragment removal finished");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algorithm::FnAlgorithm;
    use crate::objects::{CaloHitId, CaloHitParameters, HitKind, TrackParameters, TrackState};
    use crate::registry::ClusterSeed;
    use nalgebra::Vector3;

    fn hit(layer: u32, x: f64, y: f64, energy: f64) -> CaloHitParameters {
        CaloHitParameters {
            position: Vector3::new(x, y, 0.0),
            expected_direction: Vector3::new(1.0, 0.0, 0.0),
            cell_size: 30.0,
            input_energy: energy,
            em_energy: 0.5 * energy,
            hadronic_energy: energy,
            mip_equivalent_energy: energy * 50.0,
            layer,
            hit_kind: HitKind::Hcal,
            time: 0.0,
        }
    }

    fn track(momentum: f64, calorimeter: Vector3<f64>) -> TrackParameters {
        let p = Vector3::new(momentum, 0.0, 0.0);
        TrackParameters {
            d0: 0.0,
            z0: 0.0,
            charge: 1,
            mass: 0.0,
            momentum_at_dca: p,
            state_at_calorimeter: TrackState::new(calorimeter, p),
            reaches_calorimeter: true,
            can_form_pfo: true,
        }
    }

    /// Parent P: layers 40-42 along +x, 5 GeV, one 5.1 GeV track.
    /// Daughter D: layers 40-43, 40 mm beside P, 0.3 GeV, `daughter_tracks` tracks.
    /// Both clusters are saved as "Clusters", which is left current.
    pub(crate) fn scenario(daughter_tracks: usize) -> (EventContext, ClusterId, ClusterId) {
        let mut ctx = EventContext::new(DetectorSettings::default());
        let parent_hits: Vec<_> = (0..3u32)
            .map(|k| ctx.create_calo_hit(hit(40 + k, 2000.0 + 25.0 * k as f64, 0.0, 5.0 / 3.0)).unwrap())
            .collect();
        let daughter_hits: Vec<_> = (0..4u32)
            .map(|k| ctx.create_calo_hit(hit(40 + k, 2000.0 + 25.0 * k as f64, 40.0, 0.075)).unwrap())
            .collect();
        let parent_track = ctx.create_track(track(5.1, Vector3::new(1990.0, 0.0, 0.0))).unwrap();
        let daughter_track_ids: Vec<_> = (0..daughter_tracks)
            .map(|_| ctx.create_track(track(0.15, Vector3::new(1990.0, 40.0, 0.0))).unwrap())
            .collect();

        let mut ids = None;
        {
            let mut form = FnAlgorithm::new("Form", |ctx: &mut EventContext, id| {
                let temp = ctx.make_temporary_cluster_list(id)?;
                let parent = ctx.create_cluster(ClusterSeed::Hits(parent_hits.clone()))?;
                let daughter = ctx.create_cluster(ClusterSeed::Hits(daughter_hits.clone()))?;
                ctx.add_track_cluster_association(parent_track, parent)?;
                for &t in &daughter_track_ids {
                    ctx.add_track_cluster_association(t, daughter)?;
                }
                ctx.save_cluster_list(id, "Clusters", &temp, None)?;
                ctx.replace_current_cluster_list(id, "Clusters")?;
                ids = Some((parent, daughter));
                Ok(())
            });
            ctx.run_algorithm(&mut form).unwrap();
        }
        let (parent, daughter) = ids.unwrap();
        (ctx, parent, daughter)
    }

    #[test]
    fn test_fragment_merged_into_parent() {
        let (mut ctx, parent, daughter) = scenario(0);
        let mut engine = FragmentRemovalEngine::default();

        let merge = engine.step(&mut ctx).unwrap().expect("daughter should merge");
        assert_eq!(merge.parent, parent);
        assert_eq!(merge.daughter, daughter);
        assert!(merge.margin() > 2.0);

        let clusters = ctx.current_clusters().unwrap();
        assert_eq!(clusters, vec![parent]);
        assert_eq!(ctx.registry().cluster(parent).unwrap().n_hits(), 7);
        assert!(!ctx.registry().contains_cluster(daughter));
        assert!(!engine.contact_map().contains_key(&daughter));

        assert!(engine.step(&mut ctx).unwrap().is_none());
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_daughter_with_tracks_is_skipped() {
        let (mut ctx, _, _) = scenario(2);
        let mut engine = FragmentRemovalEngine::default();

        assert!(engine.step(&mut ctx).unwrap().is_none());
        assert!(engine.contact_map().is_empty());
        assert_eq!(ctx.current_clusters().unwrap().len(), 2);
    }

    #[test]
    fn test_small_daughter_is_ignored() {
        let (mut ctx, _, _) = scenario(0);
        let mut engine = FragmentRemovalEngine::new(FragmentRemovalConfig {
            min_daughter_hits: 5,
            ..FragmentRemovalConfig::default()
        });
        assert!(engine.run(&mut ctx).unwrap().is_empty());
        assert_eq!(ctx.current_clusters().unwrap().len(), 2);
    }

    /// Parent at y = 0 with daughters at y = 40 and y = 80. Only the
    /// closest-hit distance can keep a contact, so the far daughter is in
    /// reach of the parent only after the near one has merged.
    fn chain() -> (EventContext, FragmentRemovalConfig) {
        fn shower(ctx: &mut EventContext, n: u32, y: f64, energy: f64) -> Vec<CaloHitId> {
            (0..n)
                .map(|k| ctx.create_calo_hit(hit(40 + k, 2000.0 + 25.0 * k as f64, y, energy)).unwrap())
                .collect()
        }

        let mut ctx = EventContext::new(DetectorSettings::default());
        let parent_hits = shower(&mut ctx, 3, 0.0, 5.0 / 3.0);
        let near_hits = shower(&mut ctx, 4, 40.0, 0.075);
        let far_hits = shower(&mut ctx, 4, 80.0, 0.075);
        let parent_track = ctx.create_track(track(5.1, Vector3::new(1990.0, 0.0, 0.0))).unwrap();

        let mut form = FnAlgorithm::new("Form", |ctx: &mut EventContext, id| {
            let temp = ctx.make_temporary_cluster_list(id)?;
            let parent = ctx.create_cluster(ClusterSeed::Hits(parent_hits.clone()))?;
            ctx.create_cluster(ClusterSeed::Hits(near_hits.clone()))?;
            ctx.create_cluster(ClusterSeed::Hits(far_hits.clone()))?;
            ctx.add_track_cluster_association(parent_track, parent)?;
            ctx.save_cluster_list(id, "Clusters", &temp, None)?;
            ctx.replace_current_cluster_list(id, "Clusters")
        });
        ctx.run_algorithm(&mut form).unwrap();

        let config = FragmentRemovalConfig {
            contact_cut_max_distance: 60.0,
            contact_cut_n_layers: usize::MAX,
            contact_cut_cone_fraction_1: f64::INFINITY,
            contact_cut_close_hit_fraction_1: f64::INFINITY,
            contact_cut_close_hit_fraction_2: f64::INFINITY,
            contact_cut_mean_helix_distance: 0.0,
            contact_cut_closest_helix_distance: 0.0,
            contact_cut_layers_from_first_section: 0,
            ..FragmentRemovalConfig::default()
        };
        (ctx, config)
    }

    #[test]
    fn test_grown_parent_reaches_next_daughter() {
        let (mut ctx, config) = chain();
        let mut engine = FragmentRemovalEngine::new(config.clone());

        engine.step(&mut ctx).unwrap().expect("near daughter should merge");
        assert_eq!(ctx.current_clusters().unwrap().len(), 2);
        // The far daughter was cut before the parent grew.
        assert!(engine.contact_map().is_empty());

        let merges = engine.run(&mut ctx).unwrap();
        assert_eq!(merges.len(), 1);
        assert_eq!(ctx.current_clusters().unwrap().len(), 1);
        assert_eq!(ctx.registry().cluster(merges[0].parent).unwrap().n_hits(), 11);

        // Nothing left for a fresh scan either.
        assert!(FragmentRemovalEngine::new(config).run(&mut ctx).unwrap().is_empty());
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_incremental_run_matches_fresh_rescans() {
        let (mut incremental, config) = chain();
        let (mut fresh, _) = chain();

        let merged = FragmentRemovalEngine::new(config.clone()).run(&mut incremental).unwrap();
        let mut fresh_merges = 0;
        while FragmentRemovalEngine::new(config.clone()).step(&mut fresh).unwrap().is_some() {
            fresh_merges += 1;
        }
        assert_eq!(merged.len(), fresh_merges);
        assert_eq!(
            incremental.current_clusters().unwrap().len(),
            fresh.current_clusters().unwrap().len()
        );
    }

    #[test]
    fn test_algorithm_runs_through_settings() {
        let (mut ctx, parent, _) = scenario(0);
        let factory = AlgorithmFactory::new();
        let mut algorithm = FragmentRemoval::default();
        algorithm
            .read_settings(&AlgorithmConfig::new("FragmentRemoval").with_parameter("MaxChi2", 4.0), &factory)
            .unwrap();
        assert_eq!(algorithm.config.max_chi2, 4.0);

        ctx.run_algorithm(&mut algorithm).unwrap();
        assert_eq!(ctx.current_clusters().unwrap(), vec![parent]);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_count_bounded_by_cluster_count() {
        let (mut ctx, _, _) = scenario(0);
        let before = ctx.current_clusters().unwrap().len();
        let merges = FragmentRemovalEngine::default().run(&mut ctx).unwrap();
        assert!(merges.len() <= before - 1);
        assert_eq!(ctx.current_clusters().unwrap().len(), before - merges.len());
    }
}
