//! Pure numeric helpers over cluster and track summaries.

use crate::error::{PfError, PfResult};

/// Default hadronic energy resolution factor (σ/E = 0.6/√E).
pub const DEFAULT_HADRONIC_RESOLUTION: f64 = 0.6;

/// Normalised residual between a cluster energy and the energy of its tracks:
/// `(E_cluster − E_track) / (resolution · E_track / √E_track)`.
///
/// Fails if the track energy is not positive.
pub fn track_cluster_compatibility(
    cluster_energy: f64,
    track_energy: f64,
    resolution: f64,
) -> PfResult<f64> {
    if !(track_energy > 0.0) {
        return Err(PfError::failure(format!(
            "track energy must be positive, got {}",
            track_energy
        )));
    }
    if !(resolution > 0.0) {
        return Err(PfError::invalid(format!(
            "energy resolution must be positive, got {}",
            resolution
        )));
    }
    let sigma = resolution * track_energy / track_energy.sqrt();
    Ok((cluster_energy - track_energy) / sigma)
}
