//! Ground truth oracle for simulation.
//!
//! The Oracle knows what really happened in each event:
//! - Which particles entered the calorimeter, with what energy and direction
//! - Which hits each particle deposited (including split-off fragments)
//! - Which tracks the tracker reconstructed for the charged ones

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use calflow_env::{CaloHitRecord, EventRecord, HitKind, TrackRecord};

/// Charged pion mass in GeV.
pub const PION_MASS: f64 = 0.13957;

/// Kind of a true particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticleKind {
    /// Charged hadron with the given charge; always has a track
    Charged(i32),
    Photon,
    Neutron,
}

impl ParticleKind {
    pub fn is_charged(&self) -> bool {
        matches!(self, ParticleKind::Charged(_))
    }
}

/// A particle the oracle should shower into the calorimeter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleSpec {
    pub kind: ParticleKind,

    /// True energy in GeV
    pub energy: f64,

    /// Unit direction from the interaction point
    pub direction: Vector3<f64>,

    /// Split a detached fragment off the shower
    pub with_fragment: bool,
}

/// What the oracle actually deposited for one particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueParticle {
    pub spec: ParticleSpec,

    /// Number of hits in the main shower
    pub n_hits: usize,

    /// Number of hits in the split-off fragment (0 if none)
    pub n_fragment_hits: usize,

    /// Energy deposited, fragment included (GeV)
    pub deposited_energy: f64,
}

/// One generated event together with its truth.
#[derive(Debug, Clone)]
pub struct GeneratedEvent {
    pub record: EventRecord,
    pub truth: Vec<TrueParticle>,
}

impl GeneratedEvent {
    pub fn n_charged(&self) -> usize {
        self.truth.iter().filter(|p| p.spec.kind.is_charged()).count()
    }

    pub fn n_neutral(&self) -> usize {
        self.truth.len() - self.n_charged()
    }

    pub fn true_energy(&self) -> f64 {
        self.truth.iter().map(|p| p.spec.energy).sum()
    }
}

/// Calorimeter geometry used by the oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Distance of the calorimeter face from the beam axis in mm (default: 1800)
    pub face_radius: f64,

    /// Depth of one pseudo-layer in mm (default: 20)
    pub layer_thickness: f64,

    /// Layers of the electromagnetic section (default: 30)
    pub first_section_layers: u32,

    /// Total layers; deposits beyond are lost (default: 80)
    pub n_layers: u32,

    /// Cell sizes in mm for the two sections (default: 10, 30)
    pub ecal_cell_size: f64,
    pub hcal_cell_size: f64,

    /// Relative stochastic resolution for EM and hadronic showers (default: 0.15, 0.5)
    pub em_resolution: f64,
    pub hadronic_resolution: f64,

    /// Transverse offset of a fragment from its shower axis in mm (default: 100..140)
    pub fragment_offset: (f64, f64),

    /// Fraction of the shower energy carried by a fragment (default: 0.08..0.2)
    pub fragment_fraction: (f64, f64),
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            face_radius: 1800.0,
            layer_thickness: 20.0,
            first_section_layers: 30,
            n_layers: 80,
            ecal_cell_size: 10.0,
            hcal_cell_size: 30.0,
            em_resolution: 0.15,
            hadronic_resolution: 0.5,
            fragment_offset: (100.0, 140.0),
            fragment_fraction: (0.08, 0.2),
        }
    }
}

/// Shape of a shower, by particle kind.
struct ShowerShape {
    start_layer: u32,
    n_layers: u32,
    hits_per_layer: (u32, u32),
    transverse_sigma: f64,
    em_share: f64,
}

/// The Oracle - turns particle specs into detector-level events.
pub struct ShowerOracle {
    /// Master seed
    seed: u64,

    /// RNG for every random choice the oracle makes
    rng: ChaCha8Rng,

    config: OracleConfig,

    /// Next event number
    next_event: u64,

    /// Next track identifier (unique across events)
    next_track_id: u64,
}

impl ShowerOracle {
    /// Creates a new Oracle with the given seed and default geometry.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, OracleConfig::default())
    }

    pub fn with_config(seed: u64, config: OracleConfig) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            next_event: 0,
            next_track_id: 1,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Mutable access to the RNG, for scenario-level choices.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Uniformly random direction in the barrel: full azimuth, |cos(theta)| < 0.3.
    pub fn random_direction(&mut self) -> Vector3<f64> {
        let phi = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let cos_theta: f64 = self.rng.gen_range(-0.3..0.3);
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
        Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
    }

    /// `axis` tilted by a random angle of at most `max_angle` radians.
    pub fn direction_near(&mut self, axis: &Vector3<f64>, max_angle: f64) -> Vector3<f64> {
        let (u, v) = transverse_basis(axis);
        let angle = self.rng.gen_range(0.0..max_angle.max(1e-9));
        let phi = self.rng.gen_range(0.0..std::f64::consts::TAU);
        (axis + (u * phi.cos() + v * phi.sin()) * angle.tan()).normalize()
    }

    pub fn random_energy(&mut self, min: f64, max: f64) -> f64 {
        self.rng.gen_range(min..max)
    }

    /// Generates one event containing the given particles.
    pub fn generate(&mut self, particles: &[ParticleSpec]) -> GeneratedEvent {
        let mut record = EventRecord::new(self.next_event);
        self.next_event += 1;

        let mut truth = Vec::with_capacity(particles.len());
        for spec in particles {
            truth.push(self.shower(spec, &mut record));
            if let ParticleKind::Charged(charge) = spec.kind {
                let track = self.track(spec, charge);
                record.tracks.push(track);
            }
        }
        GeneratedEvent { record, truth }
    }

    fn shape(&mut self, kind: ParticleKind) -> ShowerShape {
        match kind {
            ParticleKind::Photon => ShowerShape {
                start_layer: self.rng.gen_range(0..3),
                n_layers: self.rng.gen_range(10..16),
                hits_per_layer: (1, 3),
                transverse_sigma: 8.0,
                em_share: 0.95,
            },
            ParticleKind::Charged(_) => ShowerShape {
                start_layer: self.rng.gen_range(0..12),
                n_layers: self.rng.gen_range(10..25),
                hits_per_layer: (1, 4),
                transverse_sigma: 15.0,
                em_share: 0.3,
            },
            ParticleKind::Neutron => ShowerShape {
                start_layer: self.rng.gen_range(5..30),
                n_layers: self.rng.gen_range(10..25),
                hits_per_layer: (1, 4),
                transverse_sigma: 20.0,
                em_share: 0.3,
            },
        }
    }

    /// Smears the true energy with the stochastic resolution of the shower type.
    fn measured_energy(&mut self, kind: ParticleKind, energy: f64) -> f64 {
        let resolution = match kind {
            ParticleKind::Photon => self.config.em_resolution,
            _ => self.config.hadronic_resolution,
        };
        let sigma = resolution * energy.max(1e-3).sqrt();
        let smeared = match Normal::new(energy, sigma) {
            Ok(normal) => normal.sample(&mut self.rng),
            Err(_) => energy,
        };
        smeared.max(0.1 * energy)
    }

    fn shower(&mut self, spec: &ParticleSpec, record: &mut EventRecord) -> TrueParticle {
        let shape = self.shape(spec.kind);
        let measured = self.measured_energy(spec.kind, spec.energy);
        let fraction = if spec.with_fragment {
            let (lo, hi) = self.config.fragment_fraction;
            self.rng.gen_range(lo..hi)
        } else {
            0.0
        };

        let last_layer = (shape.start_layer + shape.n_layers).min(self.config.n_layers);
        let mut points = Vec::new();
        let transverse = Normal::new(0.0, shape.transverse_sigma).ok();
        for layer in shape.start_layer..last_layer {
            let n = self.rng.gen_range(shape.hits_per_layer.0..=shape.hits_per_layer.1);
            for _ in 0..n {
                let (du, dv) = match &transverse {
                    Some(normal) => (normal.sample(&mut self.rng), normal.sample(&mut self.rng)),
                    None => (0.0, 0.0),
                };
                points.push((layer, du, dv));
            }
        }
        let n_hits = points.len();
        self.deposit(spec, &points, measured * (1.0 - fraction), shape.em_share, 0.0, record);

        let mut n_fragment_hits = 0;
        if spec.with_fragment {
            let (lo, hi) = self.config.fragment_offset;
            let offset = self.rng.gen_range(lo..hi);
            let side = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let first = shape.start_layer + self.rng.gen_range(1..4);
            let length = self.rng.gen_range(4..8);
            let jitter = Uniform::new(-3.0, 3.0);
            let fragment: Vec<(u32, f64, f64)> = (first..(first + length).min(self.config.n_layers))
                .map(|layer| (layer, jitter.sample(&mut self.rng), jitter.sample(&mut self.rng)))
                .collect();
            n_fragment_hits = fragment.len();
            self.deposit(spec, &fragment, measured * fraction, shape.em_share, side * offset, record);
        }

        TrueParticle {
            spec: spec.clone(),
            n_hits,
            n_fragment_hits,
            deposited_energy: measured,
        }
    }

    /// Spreads `energy` over hits at `(layer, du, dv)` around the shower axis,
    /// shifted by `offset` mm along the first transverse axis.
    fn deposit(
        &mut self,
        spec: &ParticleSpec,
        points: &[(u32, f64, f64)],
        energy: f64,
        em_share: f64,
        offset: f64,
        record: &mut EventRecord,
    ) {
        if points.is_empty() {
            return;
        }
        let weights: Vec<f64> = points.iter().map(|_| self.rng.gen_range(0.5..1.5)).collect();
        let total: f64 = weights.iter().sum();
        let (u, v) = transverse_basis(&spec.direction);

        for (&(layer, du, dv), weight) in points.iter().zip(&weights) {
            let depth = self.config.face_radius + layer as f64 * self.config.layer_thickness;
            let axis_point = spec.direction * depth;
            let position = axis_point + u * (du + offset) + v * dv;
            let hit_energy = energy * weight / total;
            let ecal = layer < self.config.first_section_layers;
            record.calo_hits.push(CaloHitRecord {
                position: [position.x, position.y, position.z],
                expected_direction: [spec.direction.x, spec.direction.y, spec.direction.z],
                cell_size: if ecal {
                    self.config.ecal_cell_size
                } else {
                    self.config.hcal_cell_size
                },
                input_energy: hit_energy,
                em_energy: hit_energy * em_share,
                hadronic_energy: hit_energy,
                mip_equivalent_energy: hit_energy * 40.0,
                layer,
                kind: if ecal { HitKind::Ecal } else { HitKind::Hcal },
                time: 0.0,
            });
        }
    }

    fn track(&mut self, spec: &ParticleSpec, charge: i32) -> TrackRecord {
        let id = self.next_track_id;
        self.next_track_id += 1;
        let p = (spec.energy * spec.energy - PION_MASS * PION_MASS).max(1e-6).sqrt();
        let momentum = spec.direction * p;
        let face = spec.direction * self.config.face_radius;
        TrackRecord {
            id,
            d0: 0.0,
            z0: 0.0,
            charge,
            mass: PION_MASS,
            momentum_at_dca: [momentum.x, momentum.y, momentum.z],
            calorimeter_position: [face.x, face.y, face.z],
            calorimeter_momentum: [momentum.x, momentum.y, momentum.z],
            reaches_calorimeter: true,
            can_form_pfo: true,
        }
    }
}

/// Two unit vectors spanning the plane perpendicular to `axis`.
fn transverse_basis(axis: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let reference = if axis.z.abs() < 0.9 {
        Vector3::z()
    } else {
        Vector3::x()
    };
    let u = axis.cross(&reference).normalize();
    let v = axis.cross(&u).normalize();
    (u, v)
}
