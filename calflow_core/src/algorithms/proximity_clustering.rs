use nalgebra::Vector3;
use std::collections::BTreeMap;

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::PfResult;
use crate::list_store::AlgorithmId;
use crate::objects::{CaloHitId, ClusterId};
use crate::registry::ClusterSeed;
use crate::settings::read_if_present;
use calflow_env::AlgorithmConfig;

/// Configuration for [`ProximityClustering`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityClusteringConfig {
    /// Layers a hit may look back for a cluster to join (default: 2)
    pub max_layer_gap: u32,

    /// Maximum distance in mm to the nearest hit of the joined cluster (default: 80)
    pub max_hit_distance: f64,
}

impl Default for ProximityClusteringConfig {
    fn default() -> Self {
        Self {
            max_layer_gap: 2,
            max_hit_distance: 80.0,
        }
    }
}

/// Layer-ordered nearest-neighbour clustering of the available hits in the
/// current hit list. Clusters go into the current cluster list.
#[derive(Debug, Default)]
pub struct ProximityClustering {
    config: ProximityClusteringConfig,
}

impl ProximityClustering {
    pub fn new(config: ProximityClusteringConfig) -> Self {
        Self { config }
    }
}

impl Algorithm for ProximityClustering {
    fn type_name(&self) -> &str {
        "ProximityClustering"
    }

    fn read_settings(&mut self, config: &AlgorithmConfig, _factory: &AlgorithmFactory) -> PfResult<()> {
        read_if_present(config, "MaxLayerGap", &mut self.config.max_layer_gap)?;
        read_if_present(config, "MaxHitDistance", &mut self.config.max_hit_distance)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut EventContext, _id: AlgorithmId) -> PfResult<()> {
        let mut hits: Vec<(u32, CaloHitId, Vector3<f64>)> = Vec::new();
        for id in ctx.calo_hit_lists().current_objects()? {
            if !ctx.registry().is_hit_available(id)? {
                continue;
            }
            let hit = ctx.registry().calo_hit(id)?;
            hits.push((hit.layer(), id, *hit.position()));
        }
        hits.sort_by_key(|(layer, _, _)| *layer);

        let mut by_layer: BTreeMap<u32, Vec<(ClusterId, Vector3<f64>)>> = BTreeMap::new();
        for (layer, id, position) in hits {
            let first = layer.saturating_sub(self.config.max_layer_gap);
            let nearest = by_layer
                .range(first..=layer)
                .flat_map(|(_, entries)| entries.iter())
                .map(|(cluster, other)| ((position - other).norm(), *cluster))
                .filter(|(distance, _)| *distance < self.config.max_hit_distance)
                .min_by(|a, b| a.0.total_cmp(&b.0));

            let cluster = match nearest {
                Some((_, cluster)) => {
                    ctx.add_hit_to_cluster(cluster, id)?;
                    cluster
                }
                None => ctx.create_cluster(ClusterSeed::Hit(id))?,
            };
            by_layer.entry(layer).or_default().push((cluster, position));
        }
        Ok(())
    }
}
