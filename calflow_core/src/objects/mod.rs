//! Event objects owned by the registry.

mod calo_hit;
mod cluster;
mod pfo;
mod track;

pub use calo_hit::{CaloHit, CaloHitParameters};
pub use cluster::{Cluster, ClusterFit};
pub use pfo::{Pfo, PfoParameters};
pub use track::{Track, TrackParameters, TrackState};

pub use calflow_env::HitKind;

use crate::arena::Handle;

pub type CaloHitId = Handle<CaloHit>;
pub type TrackId = Handle<Track>;
pub type ClusterId = Handle<Cluster>;
pub type PfoId = Handle<Pfo>;

use nalgebra::Vector3;

use crate::error::{PfError, PfResult};

pub(crate) fn check_finite(name: &str, value: f64) -> PfResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PfError::invalid(format!("{} is not finite ({})", name, value)))
    }
}

pub(crate) fn check_finite_vec(name: &str, v: &Vector3<f64>) -> PfResult<()> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(PfError::invalid(format!("{} has non-finite components", name)))
    }
}
