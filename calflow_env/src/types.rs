//! Plain event records exchanged between event sources and the core.

use serde::{Deserialize, Serialize};

/// Calorimeter sub-detector a hit was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitKind {
    Ecal,
    Hcal,
    Muon,
}

impl HitKind {
    /// Stable numeric code used by the binary event format.
    pub fn code(self) -> u8 {
        match self {
            HitKind::Ecal => 0,
            HitKind::Hcal => 1,
            HitKind::Muon => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(HitKind::Ecal),
            1 => Some(HitKind::Hcal),
            2 => Some(HitKind::Muon),
            _ => None,
        }
    }
}

/// One calorimeter energy deposit as delivered by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaloHitRecord {
    /// Cell centre [x, y, z] in mm
    pub position: [f64; 3],

    /// Unit vector pointing away from the interaction point
    pub expected_direction: [f64; 3],

    /// Transverse cell size in mm
    pub cell_size: f64,

    /// Raw energy in GeV
    pub input_energy: f64,

    /// Energy under the electromagnetic hypothesis (GeV)
    pub em_energy: f64,

    /// Energy under the hadronic hypothesis (GeV)
    pub hadronic_energy: f64,

    /// Energy in units of a minimum-ionising particle
    pub mip_equivalent_energy: f64,

    /// Pseudo-layer, counted outwards from the calorimeter face
    pub layer: u32,

    pub kind: HitKind,

    /// Hit time in ns
    pub time: f64,
}

/// One reconstructed track as delivered by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Caller-chosen identifier, referenced by `TrackRelation`
    pub id: u64,

    pub d0: f64,
    pub z0: f64,

    /// Charge in units of e, never zero
    pub charge: i32,

    /// Mass hypothesis in GeV
    pub mass: f64,

    /// Momentum at the distance of closest approach (GeV)
    pub momentum_at_dca: [f64; 3],

    /// Position at the calorimeter face (mm)
    pub calorimeter_position: [f64; 3],

    /// Momentum at the calorimeter face (GeV)
    pub calorimeter_momentum: [f64; 3],

    pub reaches_calorimeter: bool,
    pub can_form_pfo: bool,
}

/// Relation between two tracks of the same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackRelation {
    /// First id is the parent of the second id
    ParentDaughter(u64, u64),
    Siblings(u64, u64),
}

/// All inputs of one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub number: u64,
    pub calo_hits: Vec<CaloHitRecord>,
    pub tracks: Vec<TrackRecord>,
    pub relations: Vec<TrackRelation>,
}

impl EventRecord {
    /// Creates an empty event with the given number.
    pub fn new(number: u64) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// Returns true if the event carries no hits and no tracks.
    pub fn is_empty(&self) -> bool {
        self.calo_hits.is_empty() && self.tracks.is_empty()
    }

    /// Total raw calorimeter energy of the event.
    pub fn total_hit_energy(&self) -> f64 {
        self.calo_hits.iter().map(|h| h.input_energy).sum()
    }
}
