use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

use super::{CaloHit, CaloHitId, TrackId};

/// Principal-axis fit through the layer centroids of a cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterFit {
    /// Unit vector, oriented from the inner towards the outer layers
    pub direction: Vector3<f64>,

    /// Hit-weighted mean of the layer centroids
    pub intercept: Vector3<f64>,

    /// Hit-weighted rms distance of the centroids from the fitted line
    pub rms: f64,
}

impl ClusterFit {
    /// Perpendicular distance of `point` from the fitted line.
    pub fn distance_to(&self, point: &Vector3<f64>) -> f64 {
        (point - self.intercept).cross(&self.direction).norm()
    }
}

#[derive(Debug, Clone, Default)]
struct LayerSum {
    position_sum: Vector3<f64>,
    n_hits: u32,
    input_energy: f64,
}

/// Mutable aggregate of calorimeter hits and associated tracks.
///
/// Summary figures are kept as running sums; the principal-axis fit is
/// computed on first request and discarded on any hit mutation.
#[derive(Debug, Clone)]
pub struct Cluster {
    ordered_hits: BTreeMap<u32, Vec<CaloHitId>>,
    isolated_hits: BTreeSet<CaloHitId>,
    pub(crate) tracks: BTreeSet<TrackId>,
    track_seed: Option<TrackId>,
    pub(crate) available: bool,

    n_hits: usize,
    input_energy: f64,
    em_energy: f64,
    hadronic_energy: f64,
    isolated_energy: f64,
    layers: BTreeMap<u32, LayerSum>,
    fit: OnceCell<Option<ClusterFit>>,
}

impl Cluster {
    pub(crate) fn empty(track_seed: Option<TrackId>) -> Self {
        Self {
            ordered_hits: BTreeMap::new(),
            isolated_hits: BTreeSet::new(),
            tracks: BTreeSet::new(),
            track_seed,
            available: true,
            n_hits: 0,
            input_energy: 0.0,
            em_energy: 0.0,
            hadronic_energy: 0.0,
            isolated_energy: 0.0,
            layers: BTreeMap::new(),
            fit: OnceCell::new(),
        }
    }

    // === Mutation (registry only) ===

    pub(crate) fn insert_hit(&mut self, id: CaloHitId, hit: &CaloHit) {
        self.ordered_hits.entry(hit.layer()).or_default().push(id);
        self.n_hits += 1;
        self.input_energy += hit.input_energy();
        self.em_energy += hit.em_energy();
        self.hadronic_energy += hit.hadronic_energy();

        let layer = self.layers.entry(hit.layer()).or_default();
        layer.position_sum += hit.position();
        layer.n_hits += 1;
        layer.input_energy += hit.input_energy();
        self.fit = OnceCell::new();
    }

    /// Returns false if the hit is not a regular member.
    pub(crate) fn take_hit(&mut self, id: CaloHitId, hit: &CaloHit) -> bool {
        let Some(hits) = self.ordered_hits.get_mut(&hit.layer()) else {
            return false;
        };
        let Some(pos) = hits.iter().position(|h| *h == id) else {
            return false;
        };
        hits.remove(pos);
        if hits.is_empty() {
            self.ordered_hits.remove(&hit.layer());
        }

        self.n_hits -= 1;
        self.input_energy -= hit.input_energy();
        self.em_energy -= hit.em_energy();
        self.hadronic_energy -= hit.hadronic_energy();

        if let Some(layer) = self.layers.get_mut(&hit.layer()) {
            layer.position_sum -= hit.position();
            layer.n_hits -= 1;
            layer.input_energy -= hit.input_energy();
            if layer.n_hits == 0 {
                self.layers.remove(&hit.layer());
            }
        }
        self.fit = OnceCell::new();
        true
    }

    pub(crate) fn insert_isolated_hit(&mut self, id: CaloHitId, hit: &CaloHit) {
        if self.isolated_hits.insert(id) {
            self.isolated_energy += hit.input_energy();
        }
    }

    pub(crate) fn take_isolated_hit(&mut self, id: CaloHitId, hit: &CaloHit) -> bool {
        if self.isolated_hits.remove(&id) {
            self.isolated_energy -= hit.input_energy();
            true
        } else {
            false
        }
    }

    // === Queries ===

    /// Regular hits keyed by layer, inner layers first.
    pub fn ordered_hits(&self) -> &BTreeMap<u32, Vec<CaloHitId>> {
        &self.ordered_hits
    }

    /// All regular hits, inner layers first.
    pub fn hits(&self) -> impl Iterator<Item = CaloHitId> + '_ {
        self.ordered_hits.values().flatten().copied()
    }

    pub fn isolated_hits(&self) -> &BTreeSet<CaloHitId> {
        &self.isolated_hits
    }

    pub fn contains_hit(&self, id: CaloHitId, layer: u32) -> bool {
        self.ordered_hits
            .get(&layer)
            .is_some_and(|hits| hits.contains(&id))
    }

    pub fn associated_tracks(&self) -> &BTreeSet<TrackId> {
        &self.tracks
    }

    pub fn track_seed(&self) -> Option<TrackId> {
        self.track_seed
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Number of regular hits.
    pub fn n_hits(&self) -> usize {
        self.n_hits
    }

    pub fn n_isolated_hits(&self) -> usize {
        self.isolated_hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_hits == 0 && self.isolated_hits.is_empty()
    }

    /// Raw energy of regular and isolated hits.
    pub fn input_energy(&self) -> f64 {
        self.input_energy + self.isolated_energy
    }

    pub fn em_energy(&self) -> f64 {
        self.em_energy
    }

    pub fn hadronic_energy(&self) -> f64 {
        self.hadronic_energy
    }

    pub fn isolated_energy(&self) -> f64 {
        self.isolated_energy
    }

    /// Fraction of regular-hit raw energy that is electromagnetic.
    pub fn em_fraction(&self) -> f64 {
        if self.input_energy > 0.0 {
            self.em_energy / self.input_energy
        } else {
            0.0
        }
    }

    pub fn inner_layer(&self) -> Option<u32> {
        self.ordered_hits.keys().next().copied()
    }

    pub fn outer_layer(&self) -> Option<u32> {
        self.ordered_hits.keys().next_back().copied()
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_hit_count(&self, layer: u32) -> u32 {
        self.layers.get(&layer).map_or(0, |l| l.n_hits)
    }

    pub fn layer_energy(&self, layer: u32) -> f64 {
        self.layers.get(&layer).map_or(0.0, |l| l.input_energy)
    }

    /// Mean position of the regular hits in `layer`.
    pub fn centroid(&self, layer: u32) -> Option<Vector3<f64>> {
        self.layers
            .get(&layer)
            .filter(|l| l.n_hits > 0)
            .map(|l| l.position_sum / l.n_hits as f64)
    }

    /// Direction from the inner centroid to the hit-weighted mean of the
    /// centroids of the first `n_layers` occupied layers.
    pub fn initial_direction(&self, n_layers: usize) -> Option<Vector3<f64>> {
        let inner = self.centroid(self.inner_layer()?)?;
        let mut sum = Vector3::zeros();
        let mut weight = 0.0;
        for layer in self.layers.values().take(n_layers.max(2)).skip(1) {
            sum += layer.position_sum;
            weight += layer.n_hits as f64;
        }
        if weight == 0.0 {
            return None;
        }
        (sum / weight - inner).try_normalize(1e-9)
    }

    /// Principal-axis fit; `None` with fewer than two occupied layers.
    pub fn fit(&self) -> Option<&ClusterFit> {
        self.fit.get_or_init(|| self.compute_fit()).as_ref()
    }

    fn compute_fit(&self) -> Option<ClusterFit> {
        if self.layers.len() < 2 {
            return None;
        }
        let points: Vec<(Vector3<f64>, f64)> = self
            .layers
            .values()
            .map(|l| (l.position_sum / l.n_hits as f64, l.n_hits as f64))
            .collect();
        let total: f64 = points.iter().map(|(_, w)| w).sum();
        let mean = points.iter().fold(Vector3::zeros(), |acc, (p, w)| acc + p * *w) / total;

        let mut covariance = Matrix3::zeros();
        for (p, w) in &points {
            let d = p - mean;
            covariance += d * d.transpose() * *w;
        }
        covariance /= total;

        let eigen = SymmetricEigen::new(covariance);
        let (axis, _) = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        let mut direction: Vector3<f64> = eigen.eigenvectors.column(axis).into_owned();
        direction = direction.try_normalize(1e-12)?;

        let span = points[points.len() - 1].0 - points[0].0;
        if direction.dot(&span) < 0.0 {
            direction = -direction;
        }

        let residual: f64 = points
            .iter()
            .map(|(p, w)| (p - mean).cross(&direction).norm_squared() * w)
            .sum();

        Some(ClusterFit {
            direction,
            intercept: mean,
            rms: (residual / total).sqrt(),
        })
    }
}
