use nalgebra::Vector3;
use std::collections::BTreeMap;

use super::config::FragmentRemovalConfig;
use crate::error::PfResult;
use crate::objects::{Cluster, ClusterId};
use crate::registry::Registry;

/// Geometric relation between a candidate daughter and one track-associated
/// parent cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterContact {
    daughter: ClusterId,
    parent: ClusterId,

    /// Hadronic energy of the parent
    parent_energy: f64,

    /// Summed energy of the parent's tracks at the point of closest approach
    parent_track_energy: f64,

    n_contact_layers: usize,
    contact_fraction: f64,
    cone_fractions: [f64; 3],
    close_hit_fractions: [f64; 2],
    closest_hit_distance: f64,
    closest_helix_distance: f64,
    mean_helix_distance: f64,
}

struct HitPoint {
    layer: u32,
    position: Vector3<f64>,
    cell_size: f64,
}

fn hit_points(registry: &Registry, cluster: &Cluster) -> PfResult<Vec<HitPoint>> {
    cluster
        .hits()
        .map(|id| {
            let hit = registry.calo_hit(id)?;
            Ok(HitPoint {
                layer: hit.layer(),
                position: *hit.position(),
                cell_size: hit.cell_size(),
            })
        })
        .collect()
}

impl ClusterContact {
    /// Measures the contact between `daughter` and `parent`.
    pub fn new(
        registry: &Registry,
        daughter_id: ClusterId,
        parent_id: ClusterId,
        config: &FragmentRemovalConfig,
        b_field: f64,
    ) -> PfResult<Self> {
        let daughter = registry.cluster(daughter_id)?;
        let parent = registry.cluster(parent_id)?;
        let daughter_points = hit_points(registry, daughter)?;
        let parent_points = hit_points(registry, parent)?;

        let mut parent_track_energy = 0.0;
        for &track in parent.associated_tracks() {
            parent_track_energy += registry.track(track)?.energy_at_dca();
        }

        let mut contact = Self {
            daughter: daughter_id,
            parent: parent_id,
            parent_energy: parent.hadronic_energy(),
            parent_track_energy,
            n_contact_layers: 0,
            contact_fraction: 0.0,
            cone_fractions: [0.0; 3],
            close_hit_fractions: [0.0; 2],
            closest_hit_distance: f64::INFINITY,
            closest_helix_distance: f64::INFINITY,
            mean_helix_distance: f64::INFINITY,
        };
        if daughter_points.is_empty() {
            return Ok(contact);
        }

        contact.measure_layers(&daughter_points, &parent_points, config);
        contact.measure_distances(&daughter_points, &parent_points, config);
        contact.measure_cones(&daughter_points, parent, config);
        contact.measure_helices(registry, daughter, &daughter_points, parent, config, b_field)?;
        Ok(contact)
    }

    fn measure_layers(&mut self, daughter: &[HitPoint], parent: &[HitPoint], config: &FragmentRemovalConfig) {
        let mut parent_by_layer: BTreeMap<u32, Vec<&Vector3<f64>>> = BTreeMap::new();
        for point in parent {
            parent_by_layer.entry(point.layer).or_default().push(&point.position);
        }

        let mut daughter_by_layer: BTreeMap<u32, Vec<&HitPoint>> = BTreeMap::new();
        for point in daughter {
            daughter_by_layer.entry(point.layer).or_default().push(point);
        }

        let mut contact_hits = 0;
        for (layer, points) in &daughter_by_layer {
            let Some(others) = parent_by_layer.get(layer) else {
                continue;
            };
            let touching = points.iter().any(|d| {
                let limit = config.contact_distance_threshold * d.cell_size;
                others.iter().any(|p| (d.position - *p).norm() < limit)
            });
            if touching {
                self.n_contact_layers += 1;
                contact_hits += points.len();
            }
        }
        self.contact_fraction = contact_hits as f64 / daughter.len() as f64;
    }

    fn measure_distances(&mut self, daughter: &[HitPoint], parent: &[HitPoint], config: &FragmentRemovalConfig) {
        let mut close = [0usize; 2];
        for d in daughter {
            let nearest = parent
                .iter()
                .map(|p| (d.position - p.position).norm())
                .fold(f64::INFINITY, f64::min);
            self.closest_hit_distance = self.closest_hit_distance.min(nearest);
            if nearest < config.close_hit_distance_1 {
                close[0] += 1;
            }
            if nearest < config.close_hit_distance_2 {
                close[1] += 1;
            }
        }
        let n = daughter.len() as f64;
        self.close_hit_fractions = [close[0] as f64 / n, close[1] as f64 / n];
    }

    /// Cones open from the parent's inner centroid along its fitted axis.
    fn measure_cones(&mut self, daughter: &[HitPoint], parent: &Cluster, config: &FragmentRemovalConfig) {
        let Some(apex) = parent.inner_layer().and_then(|layer| parent.centroid(layer)) else {
            return;
        };
        let axis = parent
            .fit()
            .map(|fit| fit.direction)
            .or_else(|| parent.initial_direction(3))
            .or_else(|| apex.try_normalize(1e-9));
        let Some(axis) = axis else {
            return;
        };

        let mut inside = [0usize; 3];
        for d in daughter {
            let offset = d.position - apex;
            let norm = offset.norm();
            let cosine = if norm > 0.0 { offset.dot(&axis) / norm } else { 1.0 };
            for (count, cut) in inside.iter_mut().zip(config.cone_cosines) {
                if cosine > cut {
                    *count += 1;
                }
            }
        }
        let n = daughter.len() as f64;
        self.cone_fractions = inside.map(|count| count as f64 / n);
    }

    fn measure_helices(
        &mut self,
        registry: &Registry,
        daughter: &Cluster,
        points: &[HitPoint],
        parent: &Cluster,
        config: &FragmentRemovalConfig,
        b_field: f64,
    ) -> PfResult<()> {
        let Some(inner) = daughter.inner_layer() else {
            return Ok(());
        };
        let last_layer = inner.saturating_add(config.max_layers_for_helix);
        let near: Vec<&HitPoint> = points.iter().filter(|p| p.layer < last_layer).collect();
        if near.is_empty() {
            return Ok(());
        }

        for &track_id in parent.associated_tracks() {
            let helix = registry.track(track_id)?.helix_at_calorimeter(b_field);
            let distances: Vec<f64> = near.iter().map(|p| helix.distance_to(&p.position)).collect();
            let closest = distances.iter().copied().fold(f64::INFINITY, f64::min);
            let mean = distances.iter().sum::<f64>() / distances.len() as f64;
            self.closest_helix_distance = self.closest_helix_distance.min(closest);
            self.mean_helix_distance = self.mean_helix_distance.min(mean);
        }
        Ok(())
    }

    /// Coarse cut applied before a contact enters the map.
    ///
    /// A distant parent is kept only with a secondary signal, or when the
    /// daughter starts just behind the first calorimeter section.
    pub fn passes_prefilter(&self, daughter_inner_layer: u32, first_section_layers: u32, config: &FragmentRemovalConfig) -> bool {
        if self.closest_hit_distance <= config.contact_cut_max_distance {
            return true;
        }
        let interesting = self.n_contact_layers > config.contact_cut_n_layers
            || self.cone_fractions[0] > config.contact_cut_cone_fraction_1
            || self.close_hit_fractions[0] > config.contact_cut_close_hit_fraction_1
            || self.close_hit_fractions[1] > config.contact_cut_close_hit_fraction_2
            || self.mean_helix_distance < config.contact_cut_mean_helix_distance
            || self.closest_helix_distance < config.contact_cut_closest_helix_distance;
        let just_outside_first_section = daughter_inner_layer >= first_section_layers
            && daughter_inner_layer < first_section_layers + config.contact_cut_layers_from_first_section;
        interesting || just_outside_first_section
    }

    pub fn daughter(&self) -> ClusterId {
        self.daughter
    }

    pub fn parent(&self) -> ClusterId {
        self.parent
    }

    pub fn parent_energy(&self) -> f64 {
        self.parent_energy
    }

    pub fn parent_track_energy(&self) -> f64 {
        self.parent_track_energy
    }

    /// Layers where a daughter hit sits within the contact distance of a parent hit.
    pub fn n_contact_layers(&self) -> usize {
        self.n_contact_layers
    }

    /// Fraction of daughter hits lying in contact layers.
    pub fn contact_fraction(&self) -> f64 {
        self.contact_fraction
    }

    pub fn cone_fractions(&self) -> [f64; 3] {
        self.cone_fractions
    }

    pub fn close_hit_fractions(&self) -> [f64; 2] {
        self.close_hit_fractions
    }

    pub fn closest_hit_distance(&self) -> f64 {
        self.closest_hit_distance
    }

    pub fn closest_helix_distance(&self) -> f64 {
        self.closest_helix_distance
    }

    pub fn mean_helix_distance(&self) -> f64 {
        self.mean_helix_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::tests::scenario;
    use approx::assert_relative_eq;

    #[test]
    fn test_contact_measurements() {
        let (ctx, parent, daughter) = scenario(0);
        let config = FragmentRemovalConfig::default();
        let contact = ClusterContact::new(ctx.registry(), daughter, parent, &config, 4.0).unwrap();

        assert_eq!(contact.n_contact_layers(), 3);
        assert_relative_eq!(contact.contact_fraction(), 0.75);
        assert_relative_eq!(contact.closest_hit_distance(), 40.0, epsilon = 1e-9);
        assert_eq!(contact.close_hit_fractions(), [1.0, 1.0]);
        assert_eq!(contact.cone_fractions(), [0.0, 0.0, 0.0]);
        assert_relative_eq!(contact.parent_energy(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(contact.parent_track_energy(), 5.1, epsilon = 1e-9);

        assert!(contact.closest_helix_distance() > 39.5 && contact.closest_helix_distance() < 40.5);
        assert!(contact.mean_helix_distance() >= contact.closest_helix_distance());
        assert!(contact.passes_prefilter(40, 30, &config));
    }

    #[test]
    fn test_distant_contact_needs_a_signal() {
        let (ctx, parent, daughter) = scenario(0);
        let config = FragmentRemovalConfig {
            contact_cut_max_distance: 10.0,
            contact_cut_n_layers: 5,
            contact_cut_close_hit_fraction_1: 1.0,
            contact_cut_close_hit_fraction_2: 1.0,
            contact_cut_mean_helix_distance: 1.0,
            contact_cut_closest_helix_distance: 1.0,
            ..FragmentRemovalConfig::default()
        };
        let contact = ClusterContact::new(ctx.registry(), daughter, parent, &config, 4.0).unwrap();

        assert!(!contact.passes_prefilter(40, 30, &config));
        // Daughter starting two layers behind the first section is always kept.
        assert!(contact.passes_prefilter(32, 30, &config));
    }
}
