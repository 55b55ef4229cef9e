//! Scoring of candidate merges.

use super::config::FragmentRemovalConfig;
use super::contact::ClusterContact;
use crate::error::PfResult;
use crate::objects::Cluster;
use crate::physics::track_cluster_compatibility;

/// Weighted evidence terms for merging a daughter into one parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeEvidence {
    pub contact: f64,
    pub cone: f64,
    pub track: f64,
    pub distance: f64,
}

impl MergeEvidence {
    /// Computes the four terms, unweighted.
    pub fn new(contact: &ClusterContact, daughter_in_first_section: bool, config: &FragmentRemovalConfig) -> Self {
        let layer_evidence = config
            .contact_layer_steps
            .iter()
            .find(|(min_layers, _)| contact.n_contact_layers() >= *min_layers)
            .map_or(0.0, |(_, value)| *value);
        let contact_evidence = layer_evidence * (1.0 + contact.contact_fraction());

        let cones = contact.cone_fractions();
        let mut cone_evidence = 0.0;
        if cones[0] > config.cone_fraction_cut {
            cone_evidence = cones.iter().sum::<f64>();
            if daughter_in_first_section {
                cone_evidence *= config.cone_first_section_factor;
            }
        }

        let mut track_evidence = 0.0;
        if contact.closest_helix_distance() < config.closest_helix_cut {
            track_evidence = (config.closest_helix_cut - contact.closest_helix_distance())
                / (0.5 * config.closest_helix_cut)
                + (config.mean_helix_scale - contact.mean_helix_distance()) / config.mean_helix_scale;
        }

        let mut distance_evidence = 0.0;
        if contact.closest_hit_distance() < config.closest_distance_cut {
            let close = contact.close_hit_fractions();
            distance_evidence = (config.closest_distance_cut - contact.closest_hit_distance())
                / config.closest_distance_cut
                + config.close_hit_weight_1 * close[0]
                + config.close_hit_weight_2 * close[1];
        }

        Self {
            contact: contact_evidence,
            cone: cone_evidence,
            track: track_evidence,
            distance: distance_evidence,
        }
    }

    pub fn total(&self, config: &FragmentRemovalConfig) -> f64 {
        config.contact_weight * self.contact
            + config.cone_weight * self.cone
            + config.track_weight * self.track
            + config.distance_weight * self.distance
    }
}

/// Evidence a merge must reach before it is accepted.
///
/// Starts from the change in chi² the merge causes for the parent and adds
/// corrections that make early, energetic, photon-like or misaligned
/// daughters harder to absorb. Never below `min_required_evidence`.
pub fn required_evidence(
    contact: &ClusterContact,
    daughter: &Cluster,
    parent: &Cluster,
    config: &FragmentRemovalConfig,
    first_section_layers: u32,
) -> PfResult<f64> {
    let daughter_energy = daughter.hadronic_energy();
    let track_energy = contact.parent_track_energy();
    let old_chi = track_cluster_compatibility(contact.parent_energy(), track_energy, config.energy_resolution)?;
    let new_chi = track_cluster_compatibility(
        contact.parent_energy() + daughter_energy,
        track_energy,
        config.energy_resolution,
    )?;
    let mut required = config.required_evidence_base + config.required_chi2_weight * (new_chi * new_chi - old_chi * old_chi);

    let inner = daughter.inner_layer().unwrap_or(0);
    let in_first_section = inner < first_section_layers;
    if in_first_section {
        required += config.first_section_correction;
    }

    if daughter_energy > config.energy_correction_threshold {
        required += (daughter_energy - config.energy_correction_threshold) * config.energy_correction_slope;
    }

    let span = daughter.outer_layer().unwrap_or(inner).saturating_sub(inner);
    let photon_like = in_first_section
        && span <= config.photon_like_max_layer_span
        && daughter.em_fraction() > config.photon_like_min_em_fraction
        && daughter_energy > config.photon_like_min_energy;
    if photon_like {
        required += config.photon_like_correction;
    }

    if let (Some(d), Some(p)) = (daughter.fit(), parent.fit()) {
        if d.direction.dot(&p.direction) < config.angular_correction_cosine {
            required += config.angular_correction;
        }
    }

    Ok(required.max(config.min_required_evidence))
}

/// Whether merging the daughter could plausibly improve, or keep within
/// tolerance, the energy agreement of one of its parents or of all of them
/// taken together.
pub fn passes_preselection(
    daughter_energy: f64,
    contacts: &[ClusterContact],
    config: &FragmentRemovalConfig,
) -> PfResult<bool> {
    let resolution = config.energy_resolution;
    let mut parent_sum = 0.0;
    let mut track_sum = 0.0;

    for contact in contacts {
        let track_energy = contact.parent_track_energy();
        if track_energy <= 0.0 {
            continue;
        }
        parent_sum += contact.parent_energy();
        track_sum += track_energy;

        let old_chi = track_cluster_compatibility(contact.parent_energy(), track_energy, resolution)?;
        let new_chi = track_cluster_compatibility(contact.parent_energy() + daughter_energy, track_energy, resolution)?;
        let new_chi2 = new_chi * new_chi;
        if new_chi2 < config.max_chi2 || new_chi2 < old_chi * old_chi {
            return Ok(true);
        }
    }

    if track_sum <= 0.0 {
        return Ok(false);
    }
    let old_chi = track_cluster_compatibility(parent_sum, track_sum, resolution)?;
    let new_chi = track_cluster_compatibility(parent_sum + daughter_energy, track_sum, resolution)?;
    let new_chi2 = new_chi * new_chi;
    Ok(new_chi2 < config.max_global_chi2 || new_chi2 < old_chi * old_chi)
}
