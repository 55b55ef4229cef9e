use nalgebra::Vector3;
use std::collections::BTreeSet;
use tracing::debug;

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::PfResult;
use crate::list_store::AlgorithmId;
use crate::objects::{Cluster, ClusterId, PfoParameters, TrackId};
use crate::registry::Registry;
use crate::settings::read_if_present;
use calflow_env::AlgorithmConfig;

pub const PHOTON: i32 = 22;
pub const NEUTRON: i32 = 2112;
pub const PI_PLUS: i32 = 211;

/// Configuration for [`PfoCreation`].
#[derive(Debug, Clone, PartialEq)]
pub struct PfoCreationConfig {
    /// Name the pfos are saved under (default: "OutputPfos")
    pub output_list_name: String,

    /// Make the output list current (default: true)
    pub replace_current_list: bool,

    /// Build pfos from tracks without clusters (default: true)
    pub create_track_only_pfos: bool,

    /// Neutral clusters below this energy in GeV are dropped (default: 0.0)
    pub min_neutral_energy: f64,

    /// EM fraction above which a neutral starting in the first section is a photon (default: 0.9)
    pub photon_em_fraction: f64,
}

impl Default for PfoCreationConfig {
    fn default() -> Self {
        Self {
            output_list_name: "OutputPfos".to_string(),
            replace_current_list: true,
            create_track_only_pfos: true,
            min_neutral_energy: 0.0,
            photon_em_fraction: 0.9,
        }
    }
}

/// Turns the current clusters and tracks into particle flow objects.
///
/// Clusters with available tracks become charged pfos carrying the tracks'
/// kinematics; the rest become neutral pfos. Leftover tracks that can form
/// a pfo become track-only pfos.
#[derive(Debug, Default)]
pub struct PfoCreation {
    config: PfoCreationConfig,
}

impl PfoCreation {
    pub fn new(config: PfoCreationConfig) -> Self {
        Self { config }
    }

    fn charged(&self, registry: &Registry, cluster: Option<ClusterId>, tracks: &[TrackId]) -> PfResult<PfoParameters> {
        let mut charge = 0;
        let mut energy = 0.0;
        let mut momentum = Vector3::zeros();
        for &id in tracks {
            let track = registry.track(id)?;
            charge += track.charge();
            energy += track.energy_at_dca();
            momentum += track.momentum_at_dca();
        }
        let mass = match tracks {
            [single] => registry.track(*single)?.mass(),
            _ => (energy * energy - momentum.norm_squared()).max(0.0).sqrt(),
        };
        Ok(PfoParameters {
            particle_id: if charge < 0 { -PI_PLUS } else { PI_PLUS },
            charge,
            mass,
            energy,
            momentum,
            clusters: cluster.into_iter().collect(),
            tracks: tracks.to_vec(),
        })
    }

    fn neutral(&self, cluster_id: ClusterId, cluster: &Cluster, first_section_layers: u32) -> Option<PfoParameters> {
        let inner = cluster.inner_layer()?;
        let photon = inner < first_section_layers && cluster.em_fraction() > self.config.photon_em_fraction;
        let energy = if photon {
            cluster.em_energy()
        } else {
            cluster.hadronic_energy()
        };
        if energy < self.config.min_neutral_energy {
            return None;
        }
        let direction = cluster
            .centroid(inner)
            .and_then(|c| c.try_normalize(1e-9))
            .or_else(|| cluster.fit().map(|f| f.direction))?;
        Some(PfoParameters {
            particle_id: if photon { PHOTON } else { NEUTRON },
            charge: 0,
            mass: 0.0,
            energy,
            momentum: direction * energy,
            clusters: vec![cluster_id],
            tracks: Vec::new(),
        })
    }

    fn plan(&self, ctx: &EventContext) -> PfResult<Vec<PfoParameters>> {
        let registry = ctx.registry();
        let first_section = ctx.detector().first_section_layers;
        let mut used_tracks: BTreeSet<TrackId> = BTreeSet::new();
        let mut planned = Vec::new();

        for cluster_id in ctx.current_clusters()? {
            let cluster = registry.cluster(cluster_id)?;
            if !cluster.is_available() || cluster.n_hits() == 0 {
                continue;
            }
            let mut tracks = Vec::new();
            for &id in cluster.associated_tracks() {
                let track = registry.track(id)?;
                if track.is_available() && track.can_form_pfo() && !used_tracks.contains(&id) {
                    tracks.push(id);
                }
            }
            if tracks.is_empty() {
                planned.extend(self.neutral(cluster_id, cluster, first_section));
            } else {
                used_tracks.extend(tracks.iter().copied());
                planned.push(self.charged(registry, Some(cluster_id), &tracks)?);
            }
        }

        if self.config.create_track_only_pfos {
            for id in ctx.track_lists().current_objects()? {
                let track = registry.track(id)?;
                if track.is_available() && track.can_form_pfo() && !track.has_associated_cluster() && !used_tracks.contains(&id) {
                    used_tracks.insert(id);
                    planned.push(self.charged(registry, None, &[id])?);
                }
            }
        }
        Ok(planned)
    }
}

impl Algorithm for PfoCreation {
    fn type_name(&self) -> &str {
        "PfoCreation"
    }

    fn read_settings(&mut self, config: &AlgorithmConfig, _factory: &AlgorithmFactory) -> PfResult<()> {
        read_if_present(config, "OutputPfoListName", &mut self.config.output_list_name)?;
        read_if_present(config, "ReplaceCurrentPfoList", &mut self.config.replace_current_list)?;
        read_if_present(config, "CreateTrackOnlyPfos", &mut self.config.create_track_only_pfos)?;
        read_if_present(config, "MinNeutralEnergy", &mut self.config.min_neutral_energy)?;
        read_if_present(config, "PhotonEmFraction", &mut self.config.photon_em_fraction)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut EventContext, id: AlgorithmId) -> PfResult<()> {
        let planned = self.plan(ctx)?;
        let temp = ctx.pfo_lists_mut().make_temporary_and_set_current(id)?;
        for params in &planned {
            ctx.create_pfo(params)?;
        }

        let name = &self.config.output_list_name;
        ctx.pfo_lists_mut().save(id, name, &temp, None)?;
        if self.config.replace_current_list {
            ctx.pfo_lists_mut().replace_current(id, name)?;
        }
        debug!(list = %name, n_pfos = planned.len(), "created pfos");
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
    fn test_charged_neutral_and_track_only() {
        let mut ctx = EventContext::new(DetectorSettings::default());
        let charged_hits: Vec<_> = (40..43).map(|l| ctx.create_calo_hit(hit_params(l, 2000.0 + l as f64)).unwrap()).collect();
        let neutral_hits: Vec<_> = (40..43)
            .map(|l| {
                let mut params = hit_params(l, 2000.0 + l as f64);
                params.position.y = 300.0;
                ctx.create_calo_hit(params).unwrap()
            })
            .collect();
        let associated = ctx.create_track(track_params(1.5)).unwrap();
        let lonely = ctx.create_track(track_params(0.4)).unwrap();

        let mut form = FnAlgorithm::new("Form", move |ctx: &mut EventContext, id| {
            let temp = ctx.make_temporary_cluster_list(id)?;
            let charged = ctx.create_cluster(ClusterSeed::Hits(charged_hits.clone()))?;
            ctx.create_cluster(ClusterSeed::Hits(neutral_hits.clone()))?;
            ctx.add_track_cluster_association(associated, charged)?;
            ctx.save_cluster_list(id, "Clusters", &temp, None)?;
            ctx.replace_current_cluster_list(id, "Clusters")
        });
        ctx.run_algorithm(&mut form).unwrap();
        ctx.run_algorithm(&mut PfoCreation::default()).unwrap();

        assert_eq!(ctx.pfo_lists().current_name().unwrap(), "OutputPfos");
        let pfos: Vec<_> = ctx.pfo_lists().current_objects().unwrap();
        assert_eq!(pfos.len(), 3);

        let registry = ctx.registry();
        let charges: Vec<i32> = pfos.iter().map(|p| registry.pfo(*p).unwrap().charge()).collect();
        assert_eq!(charges.iter().filter(|c| **c == 1).count(), 2);
        let neutral = pfos.iter().map(|p| registry.pfo(*p).unwrap()).find(|p| p.charge() == 0).unwrap();
        assert_eq!(neutral.particle_id(), NEUTRON);
        approx::assert_relative_eq!(neutral.energy(), 1.5, epsilon = 1e-9);
        assert!(!registry.track(lonely).unwrap().is_available());
        ctx.check_invariants().unwrap();
    }
}
