//! Event topologies for simulation runs.

use rand::Rng;

use crate::oracle::{ParticleKind, ParticleSpec, ShowerOracle};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: one isolated charged hadron
    SingleCharged,

    /// SIM-002: a photon and a neutral hadron, well separated
    NeutralPair,

    /// SIM-003: charged hadron that sheds a fragment, plus a distant photon
    FragmentShower,

    /// SIM-004: several overlapping particles in a narrow cone
    DenseJet,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SingleCharged,
            ScenarioId::NeutralPair,
            ScenarioId::FragmentShower,
            ScenarioId::DenseJet,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SingleCharged => "single_charged",
            ScenarioId::NeutralPair => "neutral_pair",
            ScenarioId::FragmentShower => "fragment_shower",
            ScenarioId::DenseJet => "dense_jet",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SingleCharged => "One 5-20 GeV charged hadron with its track",
            ScenarioId::NeutralPair => "A photon and a neutron at least 0.5 rad apart",
            ScenarioId::FragmentShower => "Charged hadron with a detached fragment, plus a photon",
            ScenarioId::DenseJet => "3-6 particles within 0.15 rad, charged ones may fragment",
        }
    }

    /// Draws the particles of one event.
    pub fn particles(&self, oracle: &mut ShowerOracle) -> Vec<ParticleSpec> {
        match self {
            ScenarioId::SingleCharged => {
                let direction = oracle.random_direction();
                let energy = oracle.random_energy(5.0, 20.0);
                let charge = random_charge(oracle);
                vec![spec(ParticleKind::Charged(charge), energy, direction, false)]
            }
            ScenarioId::NeutralPair => {
                let photon_dir = oracle.random_direction();
                let mut neutron_dir = oracle.random_direction();
                while neutron_dir.dot(&photon_dir) > 0.5f64.cos() {
                    neutron_dir = oracle.random_direction();
                }
                vec![
                    spec(ParticleKind::Photon, oracle.random_energy(1.0, 10.0), photon_dir, false),
                    spec(ParticleKind::Neutron, oracle.random_energy(2.0, 15.0), neutron_dir, false),
                ]
            }
            ScenarioId::FragmentShower => {
                let direction = oracle.random_direction();
                let mut photon_dir = oracle.random_direction();
                while photon_dir.dot(&direction) > 0.5f64.cos() {
                    photon_dir = oracle.random_direction();
                }
                let charge = random_charge(oracle);
                vec![
                    spec(ParticleKind::Charged(charge), oracle.random_energy(8.0, 25.0), direction, true),
                    spec(ParticleKind::Photon, oracle.random_energy(1.0, 5.0), photon_dir, false),
                ]
            }
            ScenarioId::DenseJet => {
                let axis = oracle.random_direction();
                let n = oracle.rng().gen_range(3..=6);
                (0..n)
                    .map(|_| {
                        let direction = oracle.direction_near(&axis, 0.15);
                        let roll: f64 = oracle.rng().gen();
                        if roll < 0.6 {
                            let charge = random_charge(oracle);
                            let fragment = oracle.rng().gen_bool(0.5);
                            spec(ParticleKind::Charged(charge), oracle.random_energy(2.0, 15.0), direction, fragment)
                        } else if roll < 0.85 {
                            spec(ParticleKind::Photon, oracle.random_energy(1.0, 8.0), direction, false)
                        } else {
                            spec(ParticleKind::Neutron, oracle.random_energy(2.0, 10.0), direction, false)
                        }
                    })
                    .collect()
            }
        }
    }
}

fn random_charge(oracle: &mut ShowerOracle) -> i32 {
    if oracle.rng().gen_bool(0.5) {
        1
    } else {
        -1
    }
}

fn spec(kind: ParticleKind, energy: f64, direction: nalgebra::Vector3<f64>, with_fragment: bool) -> ParticleSpec {
    ParticleSpec {
        kind,
        energy,
        direction,
        with_fragment,
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_charged" | "singlecharged" | "sim-001" => Ok(ScenarioId::SingleCharged),
            "neutral_pair" | "neutralpair" | "sim-002" => Ok(ScenarioId::NeutralPair),
            "fragment_shower" | "fragmentshower" | "sim-003" => Ok(ScenarioId::FragmentShower),
            "dense_jet" | "densejet" | "sim-004" => Ok(ScenarioId::DenseJet),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
        assert_eq!("SIM-004".parse::<ScenarioId>().unwrap(), ScenarioId::DenseJet);
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_particle_content() {
        let mut oracle = ShowerOracle::new(42);
        for _ in 0..20 {
            let single = ScenarioId::SingleCharged.particles(&mut oracle);
            assert_eq!(single.len(), 1);
            assert!(single[0].kind.is_charged());

            let pair = ScenarioId::NeutralPair.particles(&mut oracle);
            assert!(pair.iter().all(|p| !p.kind.is_charged()));
            assert!(pair[0].direction.dot(&pair[1].direction) <= 0.5f64.cos());

            let fragment = ScenarioId::FragmentShower.particles(&mut oracle);
            assert!(fragment[0].with_fragment);

            let jet = ScenarioId::DenseJet.particles(&mut oracle);
            assert!((3..=6).contains(&jet.len()));
        }
    }
}
