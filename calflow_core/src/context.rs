//! Per-event world: the registry, one list store per object kind, and the
//! open reclustering transactions.
//!
//! Algorithms only ever see `&mut EventContext`. Every structural change is
//! performed here so that list membership and registry state move together.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};

use crate::algorithm::Algorithm;
use crate::error::{PfError, PfResult};
use crate::list_store::{AlgorithmId, ListStore, Ownership};
use crate::objects::{
    CaloHitId, CaloHitParameters, ClusterId, PfoId, PfoParameters, TrackId, TrackParameters,
};
use crate::recluster::ReclusterFrame;
use crate::registry::{ClusterSeed, Registry};
use calflow_env::DetectorSettings;

/// Everything one event's algorithms operate on.
pub struct EventContext {
    pub(crate) registry: Registry,
    pub(crate) calo_hit_lists: ListStore<CaloHitId>,
    pub(crate) track_lists: ListStore<TrackId>,
    pub(crate) cluster_lists: ListStore<ClusterId>,
    pub(crate) pfo_lists: ListStore<PfoId>,
    pub(crate) recluster_frames: Vec<ReclusterFrame>,
    detector: DetectorSettings,
    next_algorithm_id: u64,
}

impl EventContext {
    /// Creates a context with empty lists, ready for the first event.
    pub fn new(detector: DetectorSettings) -> Self {
        let mut ctx = Self {
            registry: Registry::new(),
            calo_hit_lists: ListStore::new("CaloHit", Ownership::Shared),
            track_lists: ListStore::new("Track", Ownership::Shared),
            cluster_lists: ListStore::new("Cluster", Ownership::Exclusive),
            pfo_lists: ListStore::new("Pfo", Ownership::Exclusive),
            recluster_frames: Vec::new(),
            detector,
            next_algorithm_id: 1,
        };
        ctx.begin_event();
        ctx
    }

    /// Clears all objects, lists, scopes and snapshots and opens fresh input lists.
    pub fn begin_event(&mut self) {
        self.registry.clear();
        self.recluster_frames.clear();
        self.calo_hit_lists.begin();
        self.track_lists.begin();
        self.cluster_lists.begin();
        self.pfo_lists.begin();
    }

    /// Releases everything; no list is current until `begin_event`.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.recluster_frames.clear();
        self.calo_hit_lists.reset();
        self.track_lists.reset();
        self.cluster_lists.reset();
        self.pfo_lists.reset();
    }

    pub fn detector(&self) -> &DetectorSettings {
        &self.detector
    }

    pub fn set_detector(&mut self, detector: DetectorSettings) {
        self.detector = detector;
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn calo_hit_lists(&self) -> &ListStore<CaloHitId> {
        &self.calo_hit_lists
    }

    pub fn calo_hit_lists_mut(&mut self) -> &mut ListStore<CaloHitId> {
        &mut self.calo_hit_lists
    }

    pub fn track_lists(&self) -> &ListStore<TrackId> {
        &self.track_lists
    }

    pub fn track_lists_mut(&mut self) -> &mut ListStore<TrackId> {
        &mut self.track_lists
    }

    pub fn cluster_lists(&self) -> &ListStore<ClusterId> {
        &self.cluster_lists
    }

    pub fn pfo_lists(&self) -> &ListStore<PfoId> {
        &self.pfo_lists
    }

    pub fn pfo_lists_mut(&mut self) -> &mut ListStore<PfoId> {
        &mut self.pfo_lists
    }

    /// Number of open reclustering/fragmentation transactions.
    pub fn reclustering_depth(&self) -> usize {
        self.recluster_frames.len()
    }

    // ========================================================================
    // INPUT OBJECTS
    // ========================================================================

    /// Creates a hit and appends it to the input hit list.
    pub fn create_calo_hit(&mut self, params: CaloHitParameters) -> PfResult<CaloHitId> {
        let id = self.registry.create_calo_hit(params)?;
        self.calo_hit_lists.insert_input(id)?;
        Ok(id)
    }

    /// Creates a track and appends it to the input track list.
    pub fn create_track(&mut self, params: TrackParameters) -> PfResult<TrackId> {
        let id = self.registry.create_track(params)?;
        self.track_lists.insert_input(id)?;
        Ok(id)
    }

    pub fn set_track_parent_daughter(&mut self, parent: TrackId, daughter: TrackId) -> PfResult<()> {
        self.registry.set_track_parent_daughter(parent, daughter)
    }

    pub fn set_track_siblings(&mut self, a: TrackId, b: TrackId) -> PfResult<()> {
        self.registry.set_track_siblings(a, b)
    }

    pub fn set_track_available(&mut self, track: TrackId, available: bool) -> PfResult<()> {
        self.registry.set_track_available(track, available)
    }

    // ========================================================================
    // CLUSTERS
    // ========================================================================

    /// Creates a cluster in the current cluster list, which must be temporary.
    pub fn create_cluster(&mut self, seed: ClusterSeed) -> PfResult<ClusterId> {
        let current = self.cluster_lists.current_name()?;
        if !self.cluster_lists.is_temporary(current) {
            return Err(PfError::not_allowed(format!(
                "clusters can only be created in temporary lists, current is '{}'",
                current
            )));
        }
        let id = self.registry.create_cluster(seed)?;
        self.cluster_lists.add_to_current(id)?;
        Ok(id)
    }

    pub fn add_hit_to_cluster(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        self.registry.add_hit(cluster, hit)
    }

    pub fn remove_hit_from_cluster(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        self.registry.remove_hit(cluster, hit)
    }

    pub fn add_isolated_hit_to_cluster(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        self.registry.add_isolated_hit(cluster, hit)
    }

    pub fn remove_isolated_hit_from_cluster(&mut self, cluster: ClusterId, hit: CaloHitId) -> PfResult<()> {
        self.registry.remove_isolated_hit(cluster, hit)
    }

    /// Merges `delete` into `enlarge`; both must be held by a named list.
    pub fn merge_and_delete_clusters(&mut self, enlarge: ClusterId, delete: ClusterId) -> PfResult<()> {
        for id in [enlarge, delete] {
            if self.cluster_lists.owner_of(id).is_none() {
                return Err(PfError::not_found(format!("cluster {} is not in any list", id)));
            }
        }
        self.registry.merge_clusters(enlarge, delete)?;
        self.cluster_lists.remove(delete);
        debug!(%enlarge, %delete, "merged clusters");
        Ok(())
    }

    /// Removes a cluster from its list and deletes it.
    pub fn delete_cluster(&mut self, id: ClusterId) -> PfResult<()> {
        self.registry.cluster(id)?;
        let owner = self
            .cluster_lists
            .owner_of(id)
            .ok_or_else(|| PfError::not_found(format!("cluster {} is not in any list", id)))?
            .to_string();
        if !self.registry.cluster(id)?.is_available() {
            return Err(PfError::not_allowed(format!("cluster {} belongs to a particle flow object", id)));
        }
        self.cluster_lists.remove_from_list(&owner, id)?;
        self.registry.delete_cluster(id)?;
        Ok(())
    }

    pub fn delete_clusters(&mut self, ids: &[ClusterId]) -> PfResult<()> {
        ids.iter().try_for_each(|&id| self.delete_cluster(id))
    }

    /// Deletes a cluster that no list holds any more.
    pub(crate) fn delete_unlisted_cluster(&mut self, id: ClusterId) -> PfResult<()> {
        if let Some(owner) = self.cluster_lists.owner_of(id) {
            return Err(PfError::not_allowed(format!(
                "cluster {} is still held by list '{}'",
                id, owner
            )));
        }
        self.registry.delete_cluster(id).map(|_| ())
    }

    // ========================================================================
    // CLUSTER LISTS
    // ========================================================================

    pub fn current_cluster_list_name(&self) -> PfResult<&str> {
        self.cluster_lists.current_name()
    }

    pub fn current_clusters(&self) -> PfResult<Vec<ClusterId>> {
        self.cluster_lists.current_objects()
    }

    pub fn make_temporary_cluster_list(&mut self, algorithm: AlgorithmId) -> PfResult<String> {
        self.cluster_lists.make_temporary_and_set_current(algorithm)
    }

    /// Temporary cluster list for `algorithm`. If `algorithm` owns the
    /// innermost transaction the list becomes a candidate of that episode
    /// with a fresh usage map; otherwise it shares the active map.
    pub(crate) fn open_candidate_list(&mut self, algorithm: AlgorithmId) -> PfResult<String> {
        let name = self.cluster_lists.make_temporary_and_set_current(algorithm)?;
        if let Some(frame) = self.recluster_frames.last_mut() {
            if frame.owner == algorithm {
                self.registry.usage.add_candidate(&name)?;
                frame.candidate_lists.push(name.clone());
            }
        }
        Ok(name)
    }

    pub fn save_cluster_list(
        &mut self,
        algorithm: AlgorithmId,
        target: &str,
        source: &str,
        subset: Option<&[ClusterId]>,
    ) -> PfResult<()> {
        self.cluster_lists.save(algorithm, target, source, subset)
    }

    pub fn replace_current_cluster_list(&mut self, algorithm: AlgorithmId, name: &str) -> PfResult<()> {
        self.cluster_lists.replace_current(algorithm, name)
    }

    /// Selects `name` until the algorithm returns. Inside a transaction the
    /// usage snapshot belonging to `name` becomes active as well.
    pub fn temporarily_replace_current_cluster_list(&mut self, name: &str) -> PfResult<()> {
        self.cluster_lists.temporarily_replace_current(name)?;
        self.activate_current_usage_map()
    }

    /// Makes the usage map of the current cluster list active, if the
    /// innermost transaction has one for it.
    fn activate_current_usage_map(&mut self) -> PfResult<()> {
        let Ok(current) = self.cluster_lists.current_name() else {
            return Ok(());
        };
        let switch = self
            .registry
            .usage
            .top()
            .is_some_and(|frame| frame.has_map(current) && frame.active_name() != current);
        if switch {
            let current = current.to_string();
            self.registry.usage.activate(&current)?;
        }
        Ok(())
    }

    pub fn drop_current_cluster_list(&mut self) {
        self.cluster_lists.drop_current();
    }

    // ========================================================================
    // TRACK ↔ CLUSTER ASSOCIATIONS
    // ========================================================================

    pub fn add_track_cluster_association(&mut self, track: TrackId, cluster: ClusterId) -> PfResult<()> {
        self.registry.associate(track, cluster)
    }

    pub fn remove_track_cluster_association(&mut self, track: TrackId, cluster: ClusterId) -> PfResult<()> {
        self.registry.disassociate(track, cluster)
    }

    /// Strips all associations from the clusters of the current list and
    /// returns the tracks left without any cluster.
    pub fn remove_current_track_cluster_associations(&mut self) -> PfResult<Vec<TrackId>> {
        let clusters = self.cluster_lists.current_objects()?;
        self.registry.remove_all_associations_for(&clusters)
    }

    // ========================================================================
    // PARTICLE FLOW OBJECTS
    // ========================================================================

    /// Creates a pfo in the current pfo list, which must be temporary.
    pub fn create_pfo(&mut self, params: &PfoParameters) -> PfResult<PfoId> {
        let current = self.pfo_lists.current_name()?;
        if !self.pfo_lists.is_temporary(current) {
            return Err(PfError::not_allowed(format!(
                "pfos can only be created in temporary lists, current is '{}'",
                current
            )));
        }
        let id = self.registry.create_pfo(params)?;
        self.pfo_lists.add_to_current(id)?;
        Ok(id)
    }

    pub fn add_cluster_to_pfo(&mut self, pfo: PfoId, cluster: ClusterId) -> PfResult<()> {
        self.registry.add_cluster_to_pfo(pfo, cluster)
    }

    pub fn add_track_to_pfo(&mut self, pfo: PfoId, track: TrackId) -> PfResult<()> {
        self.registry.add_track_to_pfo(pfo, track)
    }

    pub fn remove_cluster_from_pfo(&mut self, pfo: PfoId, cluster: ClusterId) -> PfResult<()> {
        self.registry.remove_cluster_from_pfo(pfo, cluster)
    }

    pub fn remove_track_from_pfo(&mut self, pfo: PfoId, track: TrackId) -> PfResult<()> {
        self.registry.remove_track_from_pfo(pfo, track)
    }

    /// Removes a pfo from its list, deletes it and frees its members.
    pub fn delete_pfo(&mut self, id: PfoId) -> PfResult<()> {
        self.registry.pfo(id)?;
        self.pfo_lists.remove(id);
        self.registry.delete_pfo(id)
    }

    // ========================================================================
    // ALGORITHM BOUNDARY
    // ========================================================================

    fn next_algorithm_id(&mut self) -> AlgorithmId {
        let id = AlgorithmId(self.next_algorithm_id);
        self.next_algorithm_id += 1;
        id
    }

    fn enter_scope(&mut self, id: AlgorithmId) -> PfResult<()> {
        let result = self
            .calo_hit_lists
            .register_scope(id)
            .and_then(|_| self.track_lists.register_scope(id))
            .and_then(|_| self.cluster_lists.register_scope(id))
            .and_then(|_| self.pfo_lists.register_scope(id));
        if result.is_err() {
            let _ = self.calo_hit_lists.reset_scope(id, true);
            let _ = self.track_lists.reset_scope(id, true);
            let _ = self.cluster_lists.reset_scope(id, true);
            let _ = self.pfo_lists.reset_scope(id, true);
        }
        result
    }

    /// Rolls back transactions left open by `id`, deletes its temporary
    /// lists (disposing of the objects still in them) and reselects the
    /// lists that were current on entry. Keeps going after a failure and
    /// reports the first one.
    pub(crate) fn exit_scope(&mut self, id: AlgorithmId) -> PfResult<()> {
        let mut first_error: Option<PfError> = None;

        while self.recluster_frames.last().is_some_and(|f| f.owner == id) {
            let result = self.abort_transaction(id);
            let failed = result.is_err();
            record(result, &mut first_error);
            if failed {
                break;
            }
        }

        match self.pfo_lists.reset_scope(id, true) {
            Ok(orphans) => {
                for pfo in orphans {
                    record(self.registry.delete_pfo(pfo), &mut first_error);
                }
            }
            Err(err) => record(Err(err), &mut first_error),
        }

        match self.cluster_lists.reset_scope(id, true) {
            Ok(orphans) => {
                for cluster in orphans {
                    record(self.delete_unlisted_cluster(cluster), &mut first_error);
                }
            }
            Err(err) => record(Err(err), &mut first_error),
        }
        record(self.activate_current_usage_map(), &mut first_error);

        record(self.track_lists.reset_scope(id, true).map(|_| ()), &mut first_error);
        record(self.calo_hit_lists.reset_scope(id, true).map(|_| ()), &mut first_error);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs an algorithm inside its own scope.
    ///
    /// Errors and panics raised by the algorithm are logged with its identity
    /// and type. Scope teardown happens whatever the outcome; the first error
    /// (the algorithm's own, else a teardown failure) is returned.
    pub fn run_algorithm(&mut self, algorithm: &mut dyn Algorithm) -> PfResult<()> {
        let id = self.next_algorithm_id();
        let type_name = algorithm.type_name().to_string();
        self.enter_scope(id)?;
        debug!(algorithm = %id, type_name = %type_name, "running algorithm");

        let outcome = match catch_unwind(AssertUnwindSafe(|| algorithm.run(self, id))) {
            Ok(result) => result,
            Err(payload) => Err(PfError::failure(format!(
                "algorithm panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        if let Err(err) = &outcome {
            error!(algorithm = %id, type_name = %type_name, error = %err, "algorithm failed");
        }

        let teardown = self.exit_scope(id);
        if let Err(err) = &teardown {
            error!(algorithm = %id, type_name = %type_name, error = %err, "scope teardown failed");
        }
        debug!(algorithm = %id, type_name = %type_name, "algorithm finished");
        outcome.and(teardown)
    }

    /// Runs a clustering algorithm into a fresh temporary cluster list owned
    /// by `parent` and returns the list's name, which is left current.
    ///
    /// When `parent` owns the open transaction the new list becomes a
    /// candidate with its own usage map in which every hit of the episode
    /// starts available.
    pub fn run_clustering_algorithm(
        &mut self,
        parent: AlgorithmId,
        clustering: &mut dyn Algorithm,
    ) -> PfResult<String> {
        let name = self.open_candidate_list(parent)?;
        self.run_algorithm(clustering)?;
        Ok(name)
    }

    // ========================================================================
    // INVARIANTS
    // ========================================================================

    /// Verifies the between-algorithm invariants.
    ///
    /// Only meaningful with no algorithm running and no transaction open;
    /// returns `NotAllowed` otherwise and `Failure` naming the first
    /// violation found.
    pub fn check_invariants(&self) -> PfResult<()> {
        if !self.recluster_frames.is_empty() || !self.registry.usage.is_empty() {
            return Err(PfError::not_allowed("a reclustering transaction is open"));
        }
        let stores_busy = self.calo_hit_lists.n_scopes()
            + self.track_lists.n_scopes()
            + self.cluster_lists.n_scopes()
            + self.pfo_lists.n_scopes();
        if stores_busy > 0 {
            return Err(PfError::not_allowed("an algorithm scope is still open"));
        }

        let violation = |msg: String| Err(PfError::failure(format!("invariant violated: {}", msg)));

        let mut regular: HashMap<CaloHitId, usize> = HashMap::new();
        let mut isolated: HashMap<CaloHitId, usize> = HashMap::new();
        for (id, cluster) in self.registry.clusters() {
            for hit in cluster.hits() {
                *regular.entry(hit).or_default() += 1;
            }
            for &hit in cluster.isolated_hits() {
                *isolated.entry(hit).or_default() += 1;
            }
            for &track in cluster.associated_tracks() {
                let back = self
                    .registry
                    .track(track)
                    .map(|t| t.associated_clusters().contains(&id))
                    .unwrap_or(false);
                if !back {
                    return violation(format!("cluster {} -> track {} is one-sided", id, track));
                }
            }
            if cluster.n_hits() == 0 && cluster.associated_tracks().is_empty() {
                return violation(format!("cluster {} has no hits and no tracks", id));
            }
            match self.cluster_lists.owner_of(id) {
                Some(owner) if self.cluster_lists.list(owner)?.contains(&id) => {}
                _ => return violation(format!("cluster {} is not held by a list", id)),
            }
        }

        for (id, hit) in self.registry.calo_hits() {
            let n_regular = regular.get(&id).copied().unwrap_or(0);
            let n_isolated = isolated.get(&id).copied().unwrap_or(0);
            if n_regular > 1 || n_isolated > 1 {
                return violation(format!("hit {} is shared by several clusters", id));
            }
            let member = n_regular + n_isolated > 0;
            if hit.available == member {
                return violation(format!(
                    "hit {} availability {} disagrees with membership {}",
                    id, hit.available, member
                ));
            }
        }

        for (id, track) in self.registry.tracks() {
            for &cluster in track.associated_clusters() {
                let back = self
                    .registry
                    .cluster(cluster)
                    .map(|c| c.associated_tracks().contains(&id))
                    .unwrap_or(false);
                if !back {
                    return violation(format!("track {} -> cluster {} is one-sided", id, cluster));
                }
            }
        }

        for (id, _) in self.registry.pfos() {
            if self.pfo_lists.owner_of(id).is_none() {
                return violation(format!("pfo {} is not held by a list", id));
            }
        }

        for (name, list) in self.cluster_lists.lists() {
            if let Some(stale) = list.iter().find(|c| !self.registry.contains_cluster(**c)) {
                return violation(format!("list '{}' holds retired cluster {}", name, stale));
            }
        }
        Ok(())
    }
}

fn record(result: PfResult<()>, first: &mut Option<PfError>) {
    if let Err(err) = result {
        first.get_or_insert(err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
