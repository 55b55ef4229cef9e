use nalgebra::Vector3;
use std::collections::BTreeSet;

use super::{check_finite, check_finite_vec, ClusterId, TrackId};
use crate::error::{PfError, PfResult};
use crate::helix::Helix;
use calflow_env::TrackRecord;

/// Position and momentum of a track at a reference surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackState {
    pub position: Vector3<f64>,
    pub momentum: Vector3<f64>,
}

impl TrackState {
    pub fn new(position: Vector3<f64>, momentum: Vector3<f64>) -> Self {
        Self { position, momentum }
    }
}

/// Construction parameters of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackParameters {
    pub d0: f64,
    pub z0: f64,
    pub charge: i32,
    pub mass: f64,
    pub momentum_at_dca: Vector3<f64>,
    pub state_at_calorimeter: TrackState,
    pub reaches_calorimeter: bool,
    pub can_form_pfo: bool,
}

impl TrackParameters {
    pub(crate) fn validate(&self) -> PfResult<()> {
        check_finite("d0", self.d0)?;
        check_finite("z0", self.z0)?;
        check_finite("mass", self.mass)?;
        check_finite_vec("momentum_at_dca", &self.momentum_at_dca)?;
        check_finite_vec("calorimeter position", &self.state_at_calorimeter.position)?;
        check_finite_vec("calorimeter momentum", &self.state_at_calorimeter.momentum)?;
        if self.charge == 0 {
            return Err(PfError::invalid("track charge must be non-zero"));
        }
        if self.mass < 0.0 {
            return Err(PfError::invalid(format!("negative track mass {}", self.mass)));
        }
        if self.momentum_at_dca.norm() == 0.0 {
            return Err(PfError::invalid("track momentum at dca has zero magnitude"));
        }
        if self.state_at_calorimeter.momentum.norm() == 0.0 {
            return Err(PfError::invalid("track momentum at calorimeter has zero magnitude"));
        }
        Ok(())
    }
}

impl From<&TrackRecord> for TrackParameters {
    fn from(record: &TrackRecord) -> Self {
        Self {
            d0: record.d0,
            z0: record.z0,
            charge: record.charge,
            mass: record.mass,
            momentum_at_dca: Vector3::from(record.momentum_at_dca),
            state_at_calorimeter: TrackState::new(
                Vector3::from(record.calorimeter_position),
                Vector3::from(record.calorimeter_momentum),
            ),
            reaches_calorimeter: record.reaches_calorimeter,
            can_form_pfo: record.can_form_pfo,
        }
    }
}

/// Reconstructed charged-particle trajectory.
#[derive(Debug, Clone)]
pub struct Track {
    params: TrackParameters,
    energy_at_dca: f64,
    pub(crate) available: bool,
    pub(crate) clusters: BTreeSet<ClusterId>,
    pub(crate) parents: BTreeSet<TrackId>,
    pub(crate) daughters: BTreeSet<TrackId>,
    pub(crate) siblings: BTreeSet<TrackId>,
}

impl Track {
    pub(crate) fn new(params: TrackParameters) -> PfResult<Self> {
        params.validate()?;
        let energy_at_dca =
            (params.momentum_at_dca.norm_squared() + params.mass * params.mass).sqrt();
        Ok(Self {
            params,
            energy_at_dca,
            available: true,
            clusters: BTreeSet::new(),
            parents: BTreeSet::new(),
            daughters: BTreeSet::new(),
            siblings: BTreeSet::new(),
        })
    }

    pub fn d0(&self) -> f64 {
        self.params.d0
    }

    pub fn z0(&self) -> f64 {
        self.params.z0
    }

    pub fn charge(&self) -> i32 {
        self.params.charge
    }

    pub fn mass(&self) -> f64 {
        self.params.mass
    }

    pub fn momentum_at_dca(&self) -> &Vector3<f64> {
        &self.params.momentum_at_dca
    }

    /// sqrt(p² + m²) at the distance of closest approach.
    pub fn energy_at_dca(&self) -> f64 {
        self.energy_at_dca
    }

    pub fn state_at_calorimeter(&self) -> &TrackState {
        &self.params.state_at_calorimeter
    }

    pub fn reaches_calorimeter(&self) -> bool {
        self.params.reaches_calorimeter
    }

    pub fn can_form_pfo(&self) -> bool {
        self.params.can_form_pfo
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn associated_clusters(&self) -> &BTreeSet<ClusterId> {
        &self.clusters
    }

    pub fn has_associated_cluster(&self) -> bool {
        !self.clusters.is_empty()
    }

    pub fn parents(&self) -> &BTreeSet<TrackId> {
        &self.parents
    }

    pub fn daughters(&self) -> &BTreeSet<TrackId> {
        &self.daughters
    }

    pub fn siblings(&self) -> &BTreeSet<TrackId> {
        &self.siblings
    }

    /// Helix through the calorimeter state in a field of `b_field` Tesla.
    pub fn helix_at_calorimeter(&self, b_field: f64) -> Helix {
        let state = &self.params.state_at_calorimeter;
        Helix::new(state.position, state.momentum, self.params.charge as f64, b_field)
    }
}
