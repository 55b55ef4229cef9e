use crate::error::{PfError, PfResult};
use crate::physics::DEFAULT_HADRONIC_RESOLUTION;
use crate::settings::read_if_present;
use calflow_env::AlgorithmConfig;

/// Thresholds and weights of the fragment-removal engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRemovalConfig {
    // === Daughter selection ===
    /// Minimum regular hits for a daughter (default: 3)
    pub min_daughter_hits: usize,

    /// Minimum hadronic energy for a daughter in GeV (default: 0.025)
    pub min_daughter_hadronic_energy: f64,

    // === Contact geometry ===
    /// Same-layer hit separation counted as contact, in cell sizes (default: 2.0)
    pub contact_distance_threshold: f64,

    /// Cosines of the three cones projected from the parent (default: 0.9, 0.95, 0.985)
    pub cone_cosines: [f64; 3],

    /// First close-hit distance in mm (default: 100)
    pub close_hit_distance_1: f64,

    /// Second close-hit distance in mm (default: 50)
    pub close_hit_distance_2: f64,

    /// Daughter layers, from its inner layer, compared with track helices (default: 20)
    pub max_layers_for_helix: u32,

    // === Pre-filter ===
    /// Contacts beyond this closest-hit distance need another signal (default: 750 mm)
    pub contact_cut_max_distance: f64,
    pub contact_cut_n_layers: usize,
    pub contact_cut_cone_fraction_1: f64,
    pub contact_cut_close_hit_fraction_1: f64,
    pub contact_cut_close_hit_fraction_2: f64,
    pub contact_cut_mean_helix_distance: f64,
    pub contact_cut_closest_helix_distance: f64,
    /// Daughters starting within this many layers after the first section always pass (default: 5)
    pub contact_cut_layers_from_first_section: u32,

    // === Preselection ===
    /// Per-contact chi² accepted after a hypothetical merge (default: 6.25)
    pub max_chi2: f64,

    /// Chi² over all contacts accepted after a hypothetical merge (default: 9.0)
    pub max_global_chi2: f64,

    /// Hadronic energy resolution factor (default: 0.6)
    pub energy_resolution: f64,

    // === Evidence ===
    /// Contact-layer counts and the evidence they earn, best first
    pub contact_layer_steps: [(usize, f64); 3],
    pub cone_fraction_cut: f64,
    pub cone_first_section_factor: f64,
    pub closest_helix_cut: f64,
    pub mean_helix_scale: f64,
    pub closest_distance_cut: f64,
    pub close_hit_weight_1: f64,
    pub close_hit_weight_2: f64,
    pub contact_weight: f64,
    pub cone_weight: f64,
    pub track_weight: f64,
    pub distance_weight: f64,

    // === Required evidence ===
    pub required_evidence_base: f64,
    pub required_chi2_weight: f64,
    pub min_required_evidence: f64,
    pub first_section_correction: f64,
    pub energy_correction_threshold: f64,
    pub energy_correction_slope: f64,
    pub photon_like_correction: f64,
    pub photon_like_max_layer_span: u32,
    pub photon_like_min_em_fraction: f64,
    pub photon_like_min_energy: f64,
    pub angular_correction: f64,
    pub angular_correction_cosine: f64,
}

impl Default for FragmentRemovalConfig {
    fn default() -> Self {
        Self {
            min_daughter_hits: 3,
            min_daughter_hadronic_energy: 0.025,

            contact_distance_threshold: 2.0,
            cone_cosines: [0.9, 0.95, 0.985],
            close_hit_distance_1: 100.0,
            close_hit_distance_2: 50.0,
            max_layers_for_helix: 20,

            contact_cut_max_distance: 750.0,
            contact_cut_n_layers: 2,
            contact_cut_cone_fraction_1: 0.5,
            contact_cut_close_hit_fraction_1: 0.5,
            contact_cut_close_hit_fraction_2: 0.25,
            contact_cut_mean_helix_distance: 150.0,
            contact_cut_closest_helix_distance: 50.0,
            contact_cut_layers_from_first_section: 5,

            max_chi2: 6.25,
            max_global_chi2: 9.0,
            energy_resolution: DEFAULT_HADRONIC_RESOLUTION,

            contact_layer_steps: [(10, 2.0), (4, 1.0), (1, 0.5)],
            cone_fraction_cut: 0.5,
            cone_first_section_factor: 0.5,
            closest_helix_cut: 10.0,
            mean_helix_scale: 20.0,
            closest_distance_cut: 100.0,
            close_hit_weight_1: 1.0,
            close_hit_weight_2: 2.0,
            contact_weight: 1.0,
            cone_weight: 1.0,
            track_weight: 1.0,
            distance_weight: 1.0,

            required_evidence_base: 2.0,
            required_chi2_weight: 0.5,
            min_required_evidence: 0.5,
            first_section_correction: 1.0,
            energy_correction_threshold: 3.5,
            energy_correction_slope: 0.5,
            photon_like_correction: 2.0,
            photon_like_max_layer_span: 12,
            photon_like_min_em_fraction: 0.9,
            photon_like_min_energy: 0.5,
            angular_correction: 1.0,
            angular_correction_cosine: 0.7,
        }
    }
}

impl FragmentRemovalConfig {
    /// Overrides defaults with any keys present in `config`.
    pub fn read_settings(&mut self, config: &AlgorithmConfig) -> PfResult<()> {
        read_if_present(config, "MinDaughterCaloHits", &mut self.min_daughter_hits)?;
        read_if_present(config, "MinDaughterHadronicEnergy", &mut self.min_daughter_hadronic_energy)?;
        read_if_present(config, "ContactDistanceThreshold", &mut self.contact_distance_threshold)?;
        read_if_present(config, "ConeCosines", &mut self.cone_cosines)?;
        read_if_present(config, "CloseHitDistance1", &mut self.close_hit_distance_1)?;
        read_if_present(config, "CloseHitDistance2", &mut self.close_hit_distance_2)?;
        read_if_present(config, "MaxLayersForHelix", &mut self.max_layers_for_helix)?;

        read_if_present(config, "ContactCutMaxDistance", &mut self.contact_cut_max_distance)?;
        read_if_present(config, "ContactCutNLayers", &mut self.contact_cut_n_layers)?;
        read_if_present(config, "ContactCutConeFraction1", &mut self.contact_cut_cone_fraction_1)?;
        read_if_present(config, "ContactCutCloseHitFraction1", &mut self.contact_cut_close_hit_fraction_1)?;
        read_if_present(config, "ContactCutCloseHitFraction2", &mut self.contact_cut_close_hit_fraction_2)?;
        read_if_present(config, "ContactCutMeanHelixDistance", &mut self.contact_cut_mean_helix_distance)?;
        read_if_present(config, "ContactCutClosestHelixDistance", &mut self.contact_cut_closest_helix_distance)?;
        read_if_present(
            config,
            "ContactCutLayersFromFirstSection",
            &mut self.contact_cut_layers_from_first_section,
        )?;

        read_if_present(config, "MaxChi2", &mut self.max_chi2)?;
        read_if_present(config, "MaxGlobalChi2", &mut self.max_global_chi2)?;
        read_if_present(config, "EnergyResolution", &mut self.energy_resolution)?;

        read_if_present(config, "ContactWeight", &mut self.contact_weight)?;
        read_if_present(config, "ConeWeight", &mut self.cone_weight)?;
        read_if_present(config, "TrackWeight", &mut self.track_weight)?;
        read_if_present(config, "DistanceWeight", &mut self.distance_weight)?;

        read_if_present(config, "RequiredEvidenceBase", &mut self.required_evidence_base)?;
        read_if_present(config, "RequiredChi2Weight", &mut self.required_chi2_weight)?;
        read_if_present(config, "MinRequiredEvidence", &mut self.min_required_evidence)?;
        read_if_present(config, "FirstSectionCorrection", &mut self.first_section_correction)?;
        read_if_present(config, "EnergyCorrectionThreshold", &mut self.energy_correction_threshold)?;
        read_if_present(config, "PhotonLikeCorrection", &mut self.photon_like_correction)?;
        read_if_present(config, "AngularCorrection", &mut self.angular_correction)?;

        self.validate()
    }

    fn validate(&self) -> PfResult<()> {
        if self.energy_resolution <= 0.0 {
            return Err(PfError::invalid("EnergyResolution must be positive"));
        }
        if self.contact_distance_threshold <= 0.0 {
            return Err(PfError::invalid("ContactDistanceThreshold must be positive"));
        }
        if self.cone_cosines.iter().any(|c| !(-1.0..=1.0).contains(c)) {
            return Err(PfError::invalid("ConeCosines must lie in [-1, 1]"));
        }
        if self.close_hit_distance_2 > self.close_hit_distance_1 {
            return Err(PfError::invalid("CloseHitDistance2 must not exceed CloseHitDistance1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_and_defaults() {
        let config = AlgorithmConfig::new("FragmentRemoval")
            .with_parameter("MinDaughterCaloHits", 5)
            .with_parameter("ConeCosines", serde_json::json!([0.8, 0.9, 0.95]));
        let mut settings = FragmentRemovalConfig::default();
        settings.read_settings(&config).unwrap();

        assert_eq!(settings.min_daughter_hits, 5);
        assert_eq!(settings.cone_cosines, [0.8, 0.9, 0.95]);
        assert_eq!(settings.max_chi2, 6.25);
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        let config = AlgorithmConfig::new("FragmentRemoval").with_parameter("EnergyResolution", 0.0);
        let mut settings = FragmentRemovalConfig::default();
        assert!(matches!(settings.read_settings(&config), Err(PfError::InvalidParameter(_))));
    }
}
