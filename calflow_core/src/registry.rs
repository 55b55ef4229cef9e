//! The "OWNERSHIP" Layer - canonical storage of one event's objects
//!
//! The registry owns the hit, track, cluster and pfo arenas and is the single
//! point of truth for availability. Every structural mutation goes through
//! it, which keeps three things consistent:
//! 1. Hit availability versus cluster membership
//! 2. Cluster ↔ track association symmetry
//! 3. Pfo membership versus cluster/track availability
//!
//! While a reclustering transaction is open, hit availability reads and
//! writes are redirected to the active usage snapshot.

use std::collections::BTreeSet;

use crate::arena::Arena;
use crate::error::{PfError, PfResult};
use crate::objects::{
    CaloHit, CaloHitId, CaloHitParameters, Cluster, ClusterId, Pfo, PfoId, PfoParameters, Track,
    TrackId, TrackParameters,
};
use crate::usage::UsageStack;

/// What a new cluster is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSeed {
    Hit(CaloHitId),
    Hits(Vec<CaloHitId>),
    /// Empty cluster associated with (and seeded by) a track
    Track(TrackId),
}

/// Arena storage for all objects of the current event.
#[derive(Default)]
pub struct Registry {
    hits: Arena<CaloHit>,
    tracks: Arena<Track>,
    clusters: Arena<Cluster>,
    pfos: Arena<Pfo>,
    pub(crate) usage: UsageStack,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases every object and snapshot.
    pub(crate) fn clear(&mut self) {
        self.hits.clear();
        self.tracks.clear();
        self.clusters.clear();
        self.pfos.clear();
        self.usage.clear();
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    pub fn calo_hit(&self, id: CaloHitId) -> PfResult<&CaloHit> {
        self.hits
            .get(id)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", id)))
    }

    pub fn track(&self, id: TrackId) -> PfResult<&Track> {
        self.tracks
            .get(id)
            .ok_or_else(|| PfError::not_found(format!("track {}", id)))
    }

    pub fn cluster(&self, id: ClusterId) -> PfResult<&Cluster> {
        self.clusters
            .get(id)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", id)))
    }

    pub fn pfo(&self, id: PfoId) -> PfResult<&Pfo> {
        self.pfos
            .get(id)
            .ok_or_else(|| PfError::not_found(format!("pfo {}", id)))
    }

    fn cluster_mut(&mut self, id: ClusterId) -> PfResult<&mut Cluster> {
        self.clusters
            .get_mut(id)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", id)))
    }

    fn track_mut(&mut self, id: TrackId) -> PfResult<&mut Track> {
        self.tracks
            .get_mut(id)
            .ok_or_else(|| PfError::not_found(format!("track {}", id)))
    }

    fn pfo_mut(&mut self, id: PfoId) -> PfResult<&mut Pfo> {
        self.pfos
            .get_mut(id)
            .ok_or_else(|| PfError::not_found(format!("pfo {}", id)))
    }

    pub fn contains_cluster(&self, id: ClusterId) -> bool {
        self.clusters.contains(id)
    }

    pub fn n_calo_hits(&self) -> usize {
        self.hits.len()
    }

    pub fn n_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn n_pfos(&self) -> usize {
        self.pfos.len()
    }

    pub fn calo_hits(&self) -> impl Iterator<Item = (CaloHitId, &CaloHit)> {
        self.hits.iter()
    }

    pub fn tracks(&self) -> impl Iterator<Item = (TrackId, &Track)> {
        self.tracks.iter()
    }

    pub fn clusters(&self) -> impl Iterator<Item = (ClusterId, &Cluster)> {
        self.clusters.iter()
    }

    pub fn pfos(&self) -> impl Iterator<Item = (PfoId, &Pfo)> {
        self.pfos.iter()
    }

    /// Current reclustering depth.
    pub fn reclustering_depth(&self) -> usize {
        self.usage.depth()
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    pub(crate) fn create_calo_hit(&mut self, params: CaloHitParameters) -> PfResult<CaloHitId> {
        Ok(self.hits.insert(CaloHit::new(params)?))
    }

    pub(crate) fn create_track(&mut self, params: TrackParameters) -> PfResult<TrackId> {
        Ok(self.tracks.insert(Track::new(params)?))
    }

    /// Builds a cluster; seeding hits must be available and are claimed.
    pub(crate) fn create_cluster(&mut self, seed: ClusterSeed) -> PfResult<ClusterId> {
        match seed {
            ClusterSeed::Hit(hit) => self.create_cluster_from_hits(&[hit]),
            ClusterSeed::Hits(hits) => self.create_cluster_from_hits(&hits),
            ClusterSeed::Track(track) => {
                self.track(track)?;
                let id = self.clusters.insert(Cluster::empty(Some(track)));
                self.link(track, id)?;
                Ok(id)
            }
        }
    }

    fn create_cluster_from_hits(&mut self, hits: &[CaloHitId]) -> PfResult<ClusterId> {
        if hits.is_empty() {
            return Err(PfError::invalid("cluster seed contains no hits"));
        }
        let unique: BTreeSet<_> = hits.iter().collect();
        if unique.len() != hits.len() {
            return Err(PfError::invalid("cluster seed repeats a hit"));
        }
        for &hit in hits {
            if !self.is_hit_available(hit)? {
                return Err(PfError::not_allowed(format!("hit {} is unavailable", hit)));
            }
        }

        let mut cluster = Cluster::empty(None);
        for &hit in hits {
            let data = self.calo_hit(hit)?;
            cluster.insert_hit(hit, data);
        }
        let id = self.clusters.insert(cluster);
        for &hit in hits {
            self.set_hit_available(hit, false)?;
        }
        Ok(id)
    }

    pub(crate) fn create_pfo(&mut self, params: &PfoParameters) -> PfResult<PfoId> {
        params.validate()?;
        for &cluster in &params.clusters {
            if !self.cluster(cluster)?.is_available() {
                return Err(PfError::not_allowed(format!("cluster {} is unavailable", cluster)));
            }
        }
        for &track in &params.tracks {
            if !self.track(track)?.is_available() {
                return Err(PfError::not_allowed(format!("track {} is unavailable", track)));
            }
        }

        let id = self.pfos.insert(Pfo::new(params));
        for &cluster in &params.clusters {
            self.cluster_mut(cluster)?.available = false;
        }
        for &track in &params.tracks {
            self.track_mut(track)?.available = false;
        }
        Ok(id)
    }

    // ========================================================================
    // AVAILABILITY
    // ========================================================================

    /// Availability of a hit, as seen through the active usage snapshot.
    pub fn is_hit_available(&self, id: CaloHitId) -> PfResult<bool> {
        let hit = self.calo_hit(id)?;
        Ok(self.usage.lookup(id).unwrap_or(hit.available))
    }

    /// Writes hit availability, into the active snapshot if a transaction is open.
    pub(crate) fn set_hit_available(&mut self, id: CaloHitId, available: bool) -> PfResult<()> {
        let hit = self
            .hits
            .get_mut(id)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", id)))?;
        if self.usage.is_empty() {
            hit.available = available;
            Ok(())
        } else {
            self.usage.set(id, available)
        }
    }

    /// Real flag, bypassing snapshots. Used when committing a transaction.
    pub(crate) fn write_real_hit_availability(&mut self, id: CaloHitId, available: bool) -> PfResult<()> {
        self.hits
            .get_mut(id)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", id)))?
            .available = available;
        Ok(())
    }

    pub(crate) fn set_track_available(&mut self, id: TrackId, available: bool) -> PfResult<()> {
        self.track_mut(id)?.available = available;
        Ok(())
    }

    // ========================================================================
    // CLUSTER MUTATION
    // ========================================================================

    pub(crate) fn add_hit(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        self.cluster(cluster)?;
        if !self.is_hit_available(hit)? {
            return Err(PfError::not_allowed(format!("hit {} is unavailable", hit)));
        }
        let data = self
            .hits
            .get(hit)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", hit)))?;
        self.clusters
            .get_mut(cluster)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", cluster)))?
            .insert_hit(hit, data);
        self.set_hit_available(hit, false)
    }

    pub(crate) fn remove_hit(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        let layer = self.calo_hit(hit)?.layer();
        let c = self.cluster(cluster)?;
        if !c.contains_hit(hit, layer) {
            return Err(PfError::not_found(format!("hit {} is not in cluster {}", hit, cluster)));
        }
        if c.n_hits() == 1 {
            return Err(PfError::not_allowed(format!(
                "hit {} is the last regular hit of cluster {}",
                hit, cluster
            )));
        }
        let data = self
            .hits
            .get(hit)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", hit)))?;
        self.clusters
            .get_mut(cluster)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", cluster)))?
            .take_hit(hit, data);
        self.set_hit_available(hit, true)
    }

    pub(crate) fn add_isolated_hit(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        self.cluster(cluster)?;
        if !self.is_hit_available(hit)? {
            return Err(PfError::not_allowed(format!("hit {} is unavailable", hit)));
        }
        let data = self
            .hits
            .get(hit)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", hit)))?;
        self.clusters
            .get_mut(cluster)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", cluster)))?
            .insert_isolated_hit(hit, data);
        self.set_hit_available(hit, false)
    }

    pub(crate) fn remove_isolated_hit(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        let data = self
            .hits
            .get(hit)
            .ok_or_else(|| PfError::not_found(format!("calo hit {}", hit)))?;
        let removed = self
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", cluster)))?
            .take_isolated_hit(hit, data);
        if !removed {
            return Err(PfError::not_found(format!(
                "hit {} is not an isolated hit of cluster {}",
                hit, cluster
            )));
        }
        self.set_hit_available(hit, true)
    }

    /// Moves every constituent of `delete` into `enlarge` and retires `delete`.
    /// Hit availability is unchanged: the hits stay claimed.
    pub(crate) fn merge_clusters(&mut self, enlarge: ClusterId, delete: ClusterId) -> PfResult<()> {
        if enlarge == delete {
            return Err(PfError::not_allowed(format!("cannot merge cluster {} into itself", enlarge)));
        }
        if !self.cluster(enlarge)?.is_available() || !self.cluster(delete)?.is_available() {
            return Err(PfError::not_allowed(format!(
                "cannot merge unavailable clusters {} and {}",
                enlarge, delete
            )));
        }

        let removed = self
            .clusters
            .remove(delete)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", delete)))?;

        let target = self
            .clusters
            .get_mut(enlarge)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", enlarge)))?;
        for hit in removed.hits() {
            if let Some(data) = self.hits.get(hit) {
                target.insert_hit(hit, data);
            }
        }
        for &hit in removed.isolated_hits() {
            if let Some(data) = self.hits.get(hit) {
                target.insert_isolated_hit(hit, data);
            }
        }

        for &track in removed.associated_tracks() {
            let t = self.track_mut(track)?;
            t.clusters.remove(&delete);
            if t.clusters.insert(enlarge) {
                self.cluster_mut(enlarge)?.tracks.insert(track);
            }
        }
        Ok(())
    }

    /// Deletes a cluster, restoring availability of its hits and severing its
    /// track associations. Returns the tracks it was associated with.
    pub(crate) fn delete_cluster(&mut self, id: ClusterId) -> PfResult<Vec<TrackId>> {
        let cluster = self.cluster(id)?;
        if !cluster.is_available() {
            return Err(PfError::not_allowed(format!(
                "cluster {} belongs to a particle flow object",
                id
            )));
        }
        let hits: Vec<CaloHitId> = cluster
            .hits()
            .chain(cluster.isolated_hits().iter().copied())
            .collect();
        for hit in hits {
            self.set_hit_available(hit, true)?;
        }
        self.discard_cluster(id)
    }

    /// Retires a cluster without touching hit availability.
    pub(crate) fn discard_cluster(&mut self, id: ClusterId) -> PfResult<Vec<TrackId>> {
        let removed = self
            .clusters
            .remove(id)
            .ok_or_else(|| PfError::not_found(format!("cluster {}", id)))?;
        let tracks: Vec<TrackId> = removed.associated_tracks().iter().copied().collect();
        for &track in &tracks {
            if let Some(t) = self.tracks.get_mut(track) {
                t.clusters.remove(&id);
            }
        }
        Ok(tracks)
    }

    // ========================================================================
    // ASSOCIATIONS
    // ========================================================================

    fn link(&mut self, track: TrackId, cluster: ClusterId) -> PfResult<()> {
        self.track_mut(track)?.clusters.insert(cluster);
        self.cluster_mut(cluster)?.tracks.insert(track);
        Ok(())
    }

    pub(crate) fn associate(&mut self, track: TrackId, cluster: ClusterId) -> PfResult<()> {
        self.track(track)?;
        if self.cluster(cluster)?.associated_tracks().contains(&track) {
            return Err(PfError::not_allowed(format!(
                "track {} is already associated with cluster {}",
                track, cluster
            )));
        }
        self.link(track, cluster)
    }

    pub(crate) fn disassociate(&mut self, track: TrackId, cluster: ClusterId) -> PfResult<()> {
        self.track(track)?;
        let c = self.cluster(cluster)?;
        if !c.associated_tracks().contains(&track) {
            return Err(PfError::not_found(format!(
                "track {} is not associated with cluster {}",
                track, cluster
            )));
        }
        if c.n_hits() == 0 && c.associated_tracks().len() == 1 {
            return Err(PfError::not_allowed(format!(
                "track {} is the only constituent of cluster {}",
                track, cluster
            )));
        }
        self.track_mut(track)?.clusters.remove(&cluster);
        self.cluster_mut(cluster)?.tracks.remove(&track);
        Ok(())
    }

    /// Strips every track association from `clusters`.
    ///
    /// Cluster sides are cleared first; the collected back-references are
    /// then removed from the tracks. Returns the tracks left without any
    /// associated cluster.
    pub(crate) fn remove_all_associations_for(&mut self, clusters: &[ClusterId]) -> PfResult<Vec<TrackId>> {
        let mut pending = Vec::new();
        for &cluster in clusters {
            let c = self.cluster_mut(cluster)?;
            pending.extend(std::mem::take(&mut c.tracks).into_iter().map(|t| (t, cluster)));
        }

        let mut dangling = BTreeSet::new();
        for (track, cluster) in pending {
            let t = self.track_mut(track)?;
            t.clusters.remove(&cluster);
            if t.clusters.is_empty() {
                dangling.insert(track);
            }
        }
        Ok(dangling.into_iter().collect())
    }

    // ========================================================================
    // TRACK RELATIONS
    // ========================================================================

    pub(crate) fn set_track_parent_daughter(&mut self, parent: TrackId, daughter: TrackId) -> PfResult<()> {
        if parent == daughter {
            return Err(PfError::invalid(format!("track {} cannot be its own parent", parent)));
        }
        self.track(parent)?;
        self.track(daughter)?;
        if self.is_descendant(parent, daughter) {
            return Err(PfError::not_allowed(format!(
                "linking {} -> {} would create a cycle",
                parent, daughter
            )));
        }
        self.track_mut(parent)?.daughters.insert(daughter);
        self.track_mut(daughter)?.parents.insert(parent);
        Ok(())
    }

    /// True if `candidate` is reachable from `root` through daughter links.
    fn is_descendant(&self, candidate: TrackId, root: TrackId) -> bool {
        let mut stack = vec![root];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == candidate {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(t) = self.tracks.get(current) {
                stack.extend(t.daughters.iter().copied());
            }
        }
        false
    }

    pub(crate) fn set_track_siblings(&mut self, a: TrackId, b: TrackId) -> PfResult<()> {
        if a == b {
            return Err(PfError::invalid(format!("track {} cannot be its own sibling", a)));
        }
        self.track(b)?;
        self.track_mut(a)?.siblings.insert(b);
        self.track_mut(b)?.siblings.insert(a);
        Ok(())
    }

    // ========================================================================
    // PFO MEMBERSHIP
    // ========================================================================

    pub(crate) fn add_cluster_to_pfo(&mut self, pfo: PfoId, cluster: ClusterId) -> PfResult<()> {
        self.pfo(pfo)?;
        if !self.cluster(cluster)?.is_available() {
            return Err(PfError::not_allowed(format!("cluster {} is unavailable", cluster)));
        }
        self.pfo_mut(pfo)?.clusters.insert(cluster);
        self.cluster_mut(cluster)?.available = false;
        Ok(())
    }

    pub(crate) fn add_track_to_pfo(&mut self, pfo: PfoId, track: TrackId) -> PfResult<()> {
        self.pfo(pfo)?;
        if !self.track(track)?.is_available() {
            return Err(PfError::not_allowed(format!("track {} is unavailable", track)));
        }
        self.pfo_mut(pfo)?.tracks.insert(track);
        self.track_mut(track)?.available = false;
        Ok(())
    }

    pub(crate) fn remove_cluster_from_pfo(&mut self, pfo: PfoId, cluster: ClusterId) -> PfResult<()> {
        let p = self.pfo(pfo)?;
        if !p.clusters.contains(&cluster) {
            return Err(PfError::not_found(format!("cluster {} is not in pfo {}", cluster, pfo)));
        }
        if p.n_members() == 1 {
            return Err(PfError::not_allowed(format!("cluster {} is the last member of pfo {}", cluster, pfo)));
        }
        self.pfo_mut(pfo)?.clusters.remove(&cluster);
        self.cluster_mut(cluster)?.available = true;
        Ok(())
    }

    pub(crate) fn remove_track_from_pfo(&mut self, pfo: PfoId, track: TrackId) -> PfResult<()> {
        let p = self.pfo(pfo)?;
        if !p.tracks.contains(&track) {
            return Err(PfError::not_found(format!("track {} is not in pfo {}", track, pfo)));
        }
        if p.n_members() == 1 {
            return Err(PfError::not_allowed(format!("track {} is the last member of pfo {}", track, pfo)));
        }
        self.pfo_mut(pfo)?.tracks.remove(&track);
        self.track_mut(track)?.available = true;
        Ok(())
    }

    /// Deletes a pfo and restores availability of its members.
    pub(crate) fn delete_pfo(&mut self, id: PfoId) -> PfResult<()> {
        let removed = self
            .pfos
            .remove(id)
            .ok_or_else(|| PfError::not_found(format!("pfo {}", id)))?;
        for cluster in removed.clusters {
            if let Some(c) = self.clusters.get_mut(cluster) {
                c.available = true;
            }
        }
        for track in removed.tracks {
            if let Some(t) = self.tracks.get_mut(track) {
                t.available = true;
            }
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
