use tracing::debug;

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::PfResult;
use crate::list_store::AlgorithmId;
use crate::objects::{ClusterId, TrackId};
use crate::physics::{track_cluster_compatibility, DEFAULT_HADRONIC_RESOLUTION};
use crate::settings::read_if_present;
use calflow_env::AlgorithmConfig;

/// Configuration for [`TrackDrivenReclustering`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReclusteringConfig {
    /// Clusters with |chi| at or below this are left alone (default: 2.0)
    pub min_chi_to_recluster: f64,

    /// Hadronic energy resolution factor (default: 0.6)
    pub energy_resolution: f64,
}

impl Default for ReclusteringConfig {
    fn default() -> Self {
        Self {
            min_chi_to_recluster: 2.0,
            energy_resolution: DEFAULT_HADRONIC_RESOLUTION,
        }
    }
}

/// Re-partitions track-associated clusters whose energy disagrees with
/// their tracks.
///
/// Each such cluster is reclustered by every candidate algorithm in turn;
/// tracks are re-associated in each candidate and the candidate whose
/// associated energy best matches the tracks is kept, else the original.
///
/// Daughters: `ClusteringAlgorithms` (list), `Association` (optional).
#[derive(Default)]
pub struct TrackDrivenReclustering {
    config: ReclusteringConfig,
    candidates: Vec<Box<dyn Algorithm>>,
    association: Option<Box<dyn Algorithm>>,
}

impl TrackDrivenReclustering {
    pub fn new(
        config: ReclusteringConfig,
        candidates: Vec<Box<dyn Algorithm>>,
        association: Option<Box<dyn Algorithm>>,
    ) -> Self {
        Self {
            config,
            candidates,
            association,
        }
    }

    fn recluster(&mut self, ctx: &mut EventContext, id: AlgorithmId, cluster: ClusterId, chi: f64) -> PfResult<()> {
        let tracks: Vec<TrackId> = ctx.registry().cluster(cluster)?.associated_tracks().iter().copied().collect();
        let mut track_energy = 0.0;
        for &track in &tracks {
            track_energy += ctx.registry().track(track)?.energy_at_dca();
        }

        let original = ctx.initialize_reclustering(id, &tracks, &[cluster])?;
        let mut best = (chi, original.clone());

        for candidate in self.candidates.iter_mut() {
            let list = ctx.run_clustering_algorithm(id, candidate.as_mut())?;
            if let Some(association) = self.association.as_mut() {
                ctx.run_algorithm(association.as_mut())?;
            }
            if let Some(candidate_chi) = list_chi(ctx, &list, &tracks, track_energy, self.config.energy_resolution)? {
                if candidate_chi < best.0 {
                    best = (candidate_chi, list);
                }
            }
        }

        debug!(
            %cluster,
            chi,
            best_chi = best.0,
            kept_original = best.1 == original,
            "reclustered"
        );
        ctx.end_reclustering(id, &best.1)
    }
}

impl Algorithm for TrackDrivenReclustering {
    fn type_name(&self) -> &str {
        "TrackDrivenReclustering"
    }

    fn read_settings(&mut self, config: &AlgorithmConfig, factory: &AlgorithmFactory) -> PfResult<()> {
        self.candidates = factory.create_daughter_list(config, "ClusteringAlgorithms")?;
        self.association = factory.create_optional_daughter(config, "Association")?;
        read_if_present(config, "MinChiToRecluster", &mut self.config.min_chi_to_recluster)?;
        read_if_present(config, "EnergyResolution", &mut self.config.energy_resolution)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut EventContext, id: AlgorithmId) -> PfResult<()> {
        if self.candidates.is_empty() {
            return Ok(());
        }

        for cluster in ctx.current_clusters()? {
            if !ctx.cluster_lists().current()?.0.contains(&cluster) {
                continue;
            }
            let registry = ctx.registry();
            let c = registry.cluster(cluster)?;
            if !c.is_available() || c.associated_tracks().is_empty() {
                continue;
            }
            let mut track_energy = 0.0;
            for &track in c.associated_tracks() {
                track_energy += registry.track(track)?.energy_at_dca();
            }
            let chi = track_cluster_compatibility(c.hadronic_energy(), track_energy, self.config.energy_resolution)?.abs();
            if chi <= self.config.min_chi_to_recluster {
                continue;
            }
            self.recluster(ctx, id, cluster, chi)?;
        }
        Ok(())
    }
}

/// |chi| of the summed energy of clusters in `list` associated with `tracks`.
fn list_chi(
    ctx: &EventContext,
    list: &str,
    tracks: &[TrackId],
    track_energy: f64,
    resolution: f64,
) -> PfResult<Option<f64>> {
    let registry = ctx.registry();
    let mut energy = 0.0;
    let mut any = false;
    for &id in ctx.cluster_lists().list(list)? {
        let cluster = registry.cluster(id)?;
        if cluster.associated_tracks().iter().any(|t| tracks.contains(t)) {
            energy += cluster.hadronic_energy();
            any = true;
        }
    }
    if !any {
        return Ok(None);
    }
    track_cluster_compatibility(energy, track_energy, resolution).map(|chi| Some(chi.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::FnAlgorithm;
    use crate::algorithms::{ProximityClustering, ProximityClusteringConfig, TrackClusterAssociation};
    use crate::registry::tests::{hit_params, track_params};
    use crate::registry::ClusterSeed;
    use calflow_env::DetectorSettings;

    /// Two showers glued into one cluster with a 2 GeV track on the first.
    fn glued_event() -> (EventContext, TrackId) {
        let mut ctx = EventContext::new(DetectorSettings::default());
        let mut hits = Vec::new();
        for layer in 0..4 {
            hits.push(ctx.create_calo_hit(hit_params(layer, 1810.0 + 25.0 * layer as f64)).unwrap());
            let mut far = hit_params(layer, 1810.0 + 25.0 * layer as f64);
            far.position.y = 400.0;
            hits.push(ctx.create_calo_hit(far).unwrap());
        }
        let track = ctx.create_track(track_params(2.0)).unwrap();

        let mut form = FnAlgorithm::new("Form", move |ctx: &mut EventContext, id| {
            let temp = ctx.make_temporary_cluster_list(id)?;
            let glued = ctx.create_cluster(ClusterSeed::Hits(hits.clone()))?;
            ctx.add_track_cluster_association(track, glued)?;
            ctx.save_cluster_list(id, "Clusters", &temp, None)?;
            ctx.replace_current_cluster_list(id, "Clusters")
        });
        ctx.run_algorithm(&mut form).unwrap();
        (ctx, track)
    }

    #[test]
    fn test_better_candidate_committed() {
        let (mut ctx, track) = glued_event();
        let mut reclustering = TrackDrivenReclustering::new(
            ReclusteringConfig::default(),
            vec![Box::new(ProximityClustering::default())],
            Some(Box::new(TrackClusterAssociation::default())),
        );
        ctx.run_algorithm(&mut reclustering).unwrap();

        let clusters = ctx.current_clusters().unwrap();
        assert_eq!(clusters.len(), 2);
        let associated: Vec<_> = ctx.registry().track(track).unwrap().associated_clusters().iter().copied().collect();
        assert_eq!(associated.len(), 1);
        assert_eq!(ctx.registry().cluster(associated[0]).unwrap().n_hits(), 4);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_original_kept_when_no_candidate_improves() {
        let (mut ctx, track) = glued_event();
        // One wide cluster whose inner centroid is too far from the track to associate.
        let wide = ProximityClustering::new(ProximityClusteringConfig {
            max_hit_distance: 1000.0,
            ..ProximityClusteringConfig::default()
        });
        let mut reclustering = TrackDrivenReclustering::new(
            ReclusteringConfig::default(),
            vec![Box::new(wide)],
            Some(Box::new(TrackClusterAssociation::default())),
        );
        let before = ctx.current_clusters().unwrap();
        ctx.run_algorithm(&mut reclustering).unwrap();

        assert_eq!(ctx.current_clusters().unwrap(), before);
        assert!(ctx.registry().track(track).unwrap().associated_clusters().contains(&before[0]));
        ctx.check_invariants().unwrap();
    }
}
