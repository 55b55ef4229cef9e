use std::collections::BTreeSet;

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::PfResult;
use crate::list_store::AlgorithmId;
use crate::objects::{ClusterId, TrackId};
use crate::settings::read_if_present;
use calflow_env::AlgorithmConfig;

/// Configuration for [`TrackClusterAssociation`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackClusterAssociationConfig {
    /// Maximum helix distance to the cluster's inner centroid in mm (default: 100)
    pub max_distance: f64,
}

impl Default for TrackClusterAssociationConfig {
    fn default() -> Self {
        Self { max_distance: 100.0 }
    }
}

/// Associates each available track of the current track list with the
/// nearest track-less cluster of the current cluster list.
///
/// Tracks already associated with a cluster of the current list are left
/// alone; associations to clusters in other lists do not count.
#[derive(Debug, Default)]
pub struct TrackClusterAssociation {
    config: TrackClusterAssociationConfig,
}

impl TrackClusterAssociation {
    pub fn new(config: TrackClusterAssociationConfig) -> Self {
        Self { config }
    }

    fn plan(&self, ctx: &EventContext) -> PfResult<Vec<(TrackId, ClusterId)>> {
        let registry = ctx.registry();
        let clusters = ctx.current_clusters()?;
        let listed: BTreeSet<ClusterId> = clusters.iter().copied().collect();
        let b_field = ctx.detector().b_field;

        let mut claimed: BTreeSet<ClusterId> = BTreeSet::new();
        let mut planned = Vec::new();
        for track_id in ctx.track_lists().current_objects()? {
            let track = registry.track(track_id)?;
            if !track.is_available() || !track.reaches_calorimeter() {
                continue;
            }
            if track.associated_clusters().iter().any(|c| listed.contains(c)) {
                continue;
            }

            let helix = track.helix_at_calorimeter(b_field);
            let mut best: Option<(f64, ClusterId)> = None;
            for &cluster_id in &clusters {
                if claimed.contains(&cluster_id) {
                    continue;
                }
                let cluster = registry.cluster(cluster_id)?;
                if !cluster.is_available() || !cluster.associated_tracks().is_empty() {
                    continue;
                }
                let Some(centroid) = cluster.inner_layer().and_then(|layer| cluster.centroid(layer)) else {
                    continue;
                };
                let distance = helix.distance_to(&centroid);
                if distance < self.config.max_distance && best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, cluster_id));
                }
            }

            if let Some((_, cluster_id)) = best {
                claimed.insert(cluster_id);
                planned.push((track_id, cluster_id));
            }
        }
        Ok(planned)
    }
}

impl Algorithm for TrackClusterAssociation {
    fn type_name(&self) -> &str {
        "TrackClusterAssociation"
    }

    fn read_settings(&mut self, config: &AlgorithmConfig, _factory: &AlgorithmFactory) -> PfResult<()> {
        read_if_present(config, "MaxDistance", &mut self.config.max_distance)
    }

    fn run(&mut self, ctx: &mut EventContext, _id: AlgorithmId) -> PfResult<()> {
        for (track, cluster) in self.plan(ctx)? {
            ctx.add_track_cluster_association(track, cluster)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::FnAlgorithm;
    use crate::registry::tests::{hit_params, track_params};
    use crate::registry::ClusterSeed;
    use calflow_env::DetectorSettings;

    #[test]
    fn test_track_joins_nearest_cluster() {
        let mut ctx = EventContext::new(DetectorSettings::default());
        let on_axis: Vec<_> = (0..3)
            .map(|l| ctx.create_calo_hit(hit_params(l, 1810.0 + 25.0 * l as f64)).unwrap())
            .collect();
        let off_axis: Vec<_> = (0..3)
            .map(|l| {
                let mut params = hit_params(l, 1810.0 + 25.0 * l as f64);
                params.position.y = 600.0;
                ctx.create_calo_hit(params).unwrap()
            })
            .collect();
        let track = ctx.create_track(track_params(10.0)).unwrap();

        let mut form = FnAlgorithm::new("Form", move |ctx: &mut EventContext, id| {
            let temp = ctx.make_temporary_cluster_list(id)?;
            ctx.create_cluster(ClusterSeed::Hits(off_axis.clone()))?;
            ctx.create_cluster(ClusterSeed::Hits(on_axis.clone()))?;
            ctx.save_cluster_list(id, "Clusters", &temp, None)?;
            ctx.replace_current_cluster_list(id, "Clusters")
        });
        ctx.run_algorithm(&mut form).unwrap();
        ctx.run_algorithm(&mut TrackClusterAssociation::default()).unwrap();

        let associated: Vec<_> = ctx.registry().track(track).unwrap().associated_clusters().iter().copied().collect();
        assert_eq!(associated.len(), 1);
        assert_eq!(ctx.registry().cluster(associated[0]).unwrap().n_hits(), 3);
        let centroid = ctx.registry().cluster(associated[0]).unwrap().centroid(0).unwrap();
        assert_eq!(centroid.y, 0.0);

        // Running again changes nothing.
        ctx.run_algorithm(&mut TrackClusterAssociation::default()).unwrap();
        assert_eq!(ctx.registry().track(track).unwrap().associated_clusters().len(), 1);
        ctx.check_invariants().unwrap();
    }
}
