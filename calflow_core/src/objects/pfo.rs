use nalgebra::Vector3;
use std::collections::BTreeSet;

use super::{check_finite, check_finite_vec, ClusterId, TrackId};
use crate::error::{PfError, PfResult};

/// Construction parameters of a particle-flow object.
#[derive(Debug, Clone, PartialEq)]
pub struct PfoParameters {
    /// PDG-style particle code
    pub particle_id: i32,
    pub charge: i32,
    pub mass: f64,
    pub energy: f64,
    pub momentum: Vector3<f64>,
    pub clusters: Vec<ClusterId>,
    pub tracks: Vec<TrackId>,
}

impl PfoParameters {
    pub(crate) fn validate(&self) -> PfResult<()> {
        check_finite("mass", self.mass)?;
        check_finite("energy", self.energy)?;
        check_finite_vec("momentum", &self.momentum)?;
        if self.clusters.is_empty() && self.tracks.is_empty() {
            return Err(PfError::invalid("pfo needs at least one cluster or track"));
        }
        Ok(())
    }
}

/// Finalized reconstruction output.
#[derive(Debug, Clone)]
pub struct Pfo {
    particle_id: i32,
    charge: i32,
    mass: f64,
    energy: f64,
    momentum: Vector3<f64>,
    pub(crate) clusters: BTreeSet<ClusterId>,
    pub(crate) tracks: BTreeSet<TrackId>,
}

impl Pfo {
    pub(crate) fn new(params: &PfoParameters) -> Self {
        Self {
            particle_id: params.particle_id,
            charge: params.charge,
            mass: params.mass,
            energy: params.energy,
            momentum: params.momentum,
            clusters: params.clusters.iter().copied().collect(),
            tracks: params.tracks.iter().copied().collect(),
        }
    }

    pub fn particle_id(&self) -> i32 {
        self.particle_id
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn momentum(&self) -> &Vector3<f64> {
        &self.momentum
    }

    pub fn clusters(&self) -> &BTreeSet<ClusterId> {
        &self.clusters
    }

    pub fn tracks(&self) -> &BTreeSet<TrackId> {
        &self.tracks
    }

    pub(crate) fn n_members(&self) -> usize {
        self.clusters.len() + self.tracks.len()
    }
}
