use nalgebra::Vector3;

use super::{check_finite, check_finite_vec, HitKind};
use crate::error::{PfError, PfResult};
use calflow_env::CaloHitRecord;

/// Construction parameters of a calorimeter hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CaloHitParameters {
    pub position: Vector3<f64>,
    pub expected_direction: Vector3<f64>,
    pub cell_size: f64,
    pub input_energy: f64,
    pub em_energy: f64,
    pub hadronic_energy: f64,
    pub mip_equivalent_energy: f64,
    pub layer: u32,
    pub hit_kind: HitKind,
    pub time: f64,
}

impl CaloHitParameters {
    pub(crate) fn validate(&self) -> PfResult<()> {
        check_finite_vec("position", &self.position)?;
        check_finite_vec("expected_direction", &self.expected_direction)?;
        for (name, value) in [
            ("cell_size", self.cell_size),
            ("input_energy", self.input_energy),
            ("em_energy", self.em_energy),
            ("hadronic_energy", self.hadronic_energy),
            ("mip_equivalent_energy", self.mip_equivalent_energy),
            ("time", self.time),
        ] {
            check_finite(name, value)?;
        }
        if self.cell_size <= 0.0 {
            return Err(PfError::invalid(format!(
                "cell_size must be positive, got {}",
                self.cell_size
            )));
        }
        if self.input_energy < 0.0 || self.em_energy < 0.0 || self.hadronic_energy < 0.0 {
            return Err(PfError::invalid("hit energies must be non-negative"));
        }
        if self.expected_direction.norm() == 0.0 {
            return Err(PfError::invalid("expected_direction has zero magnitude"));
        }
        Ok(())
    }
}

impl From<&CaloHitRecord> for CaloHitParameters {
    fn from(record: &CaloHitRecord) -> Self {
        Self {
            position: Vector3::from(record.position),
            expected_direction: Vector3::from(record.expected_direction),
            cell_size: record.cell_size,
            input_energy: record.input_energy,
            em_energy: record.em_energy,
            hadronic_energy: record.hadronic_energy,
            mip_equivalent_energy: record.mip_equivalent_energy,
            layer: record.layer,
            hit_kind: record.kind,
            time: record.time,
        }
    }
}

/// Immutable calorimeter measurement plus its availability flag.
///
/// The flag is only ever written by the registry, which routes it through
/// the usage-snapshot stack while a reclustering transaction is open.
#[derive(Debug, Clone)]
pub struct CaloHit {
    params: CaloHitParameters,
    unit_direction: Vector3<f64>,
    pub(crate) available: bool,
}

impl CaloHit {
    pub(crate) fn new(params: CaloHitParameters) -> PfResult<Self> {
        params.validate()?;
        let unit_direction = params.expected_direction.normalize();
        Ok(Self {
            params,
            unit_direction,
            available: true,
        })
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.params.position
    }

    /// Unit vector of the expected shower direction at this cell.
    pub fn expected_direction(&self) -> &Vector3<f64> {
        &self.unit_direction
    }

    pub fn cell_size(&self) -> f64 {
        self.params.cell_size
    }

    pub fn input_energy(&self) -> f64 {
        self.params.input_energy
    }

    pub fn em_energy(&self) -> f64 {
        self.params.em_energy
    }

    pub fn hadronic_energy(&self) -> f64 {
        self.params.hadronic_energy
    }

    pub fn mip_equivalent_energy(&self) -> f64 {
        self.params.mip_equivalent_energy
    }

    pub fn layer(&self) -> u32 {
        self.params.layer
    }

    pub fn hit_kind(&self) -> HitKind {
        self.params.hit_kind
    }

    pub fn time(&self) -> f64 {
        self.params.time
    }

    pub fn parameters(&self) -> &CaloHitParameters {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CaloHitParameters {
        CaloHitParameters {
            position: Vector3::new(0.0, 0.0, 2000.0),
            expected_direction: Vector3::new(0.0, 0.0, 2.0),
            cell_size: 10.0,
            input_energy: 0.1,
            em_energy: 0.1,
            hadronic_energy: 0.12,
            mip_equivalent_energy: 2.0,
            layer: 3,
            hit_kind: HitKind::Ecal,
            time: 0.0,
        }
    }

    #[test]
    fn test_direction_is_normalised() {
        let hit = CaloHit::new(params()).unwrap();
        assert!((hit.expected_direction().norm() - 1.0).abs() < 1e-12);
        assert!(hit.available);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut p = params();
        p.cell_size = 0.0;
        assert!(matches!(CaloHit::new(p), Err(PfError::InvalidParameter(_))));

        let mut p = params();
        p.position.x = f64::NAN;
        assert!(matches!(CaloHit::new(p), Err(PfError::InvalidParameter(_))));

        let mut p = params();
        p.expected_direction = Vector3::zeros();
        assert!(matches!(CaloHit::new(p), Err(PfError::InvalidParameter(_))));
    }
}
