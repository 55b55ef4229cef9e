//! Reclustering and fragmentation transactions.
//!
//! A transaction lets one algorithm try any number of candidate partitions
//! of a set of clusters and commit exactly one of them (or the untouched
//! original). Hit availability changes made while a transaction is open live
//! only in usage snapshots, so rejected candidates leave no trace.
//!
//! Lifecycle per depth: initialize → candidate rounds → end. Transactions
//! nest; each frame commits into the frame below it, or into the real hit
//! flags at depth one.

use std::collections::BTreeSet;

use tracing::debug;

use crate::context::EventContext;
use crate::error::{PfError, PfResult};
use crate::list_store::AlgorithmId;
use crate::objects::{CaloHitId, ClusterId, TrackId};
use crate::usage::UsageMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionKind {
    Reclustering,
    Fragmentation,
}

impl TransactionKind {
    fn label(self) -> &'static str {
        match self {
            TransactionKind::Reclustering => "reclustering",
            TransactionKind::Fragmentation => "fragmentation",
        }
    }
}

/// Bookkeeping for one open transaction.
#[derive(Debug, Clone)]
pub(crate) struct ReclusterFrame {
    pub(crate) owner: AlgorithmId,
    pub(crate) kind: TransactionKind,
    /// Cluster list the input clusters were taken from
    pub(crate) input_cluster_list: String,
    /// Temporary list now holding the input clusters
    pub(crate) original_list: String,
    /// Candidate cluster lists created during the episode
    pub(crate) candidate_lists: Vec<String>,
    pub(crate) parent_track_list: String,
    pub(crate) parent_hit_list: String,
    pub(crate) temp_track_list: Option<String>,
    pub(crate) temp_hit_list: String,
}

impl EventContext {
    /// Opens a reclustering transaction over `clusters`, which must be in the
    /// current cluster list. Returns the name of the temporary list now
    /// holding them.
    ///
    /// A temporary track list (`tracks`) and a temporary hit list (the
    /// clusters' hits) become current.
    pub fn initialize_reclustering(
        &mut self,
        algorithm: AlgorithmId,
        tracks: &[TrackId],
        clusters: &[ClusterId],
    ) -> PfResult<String> {
        let frame = self.open_transaction(algorithm, TransactionKind::Reclustering, Some(tracks), clusters)?;
        let original = frame.original_list.clone();
        self.recluster_frames.push(frame);
        debug!(
            algorithm = %algorithm,
            depth = self.recluster_frames.len(),
            n_clusters = clusters.len(),
            "initialized reclustering"
        );
        Ok(original)
    }

    /// Commits `selected` (the original list or one of the candidates) and
    /// discards every other list of the episode.
    pub fn end_reclustering(&mut self, algorithm: AlgorithmId, selected: &str) -> PfResult<()> {
        self.close_transaction(algorithm, TransactionKind::Reclustering, selected)
    }

    /// Opens a fragmentation transaction: `clusters` move into a temporary
    /// list and an empty fragment list, in which every hit of the clusters is
    /// available, becomes current. Returns `(original_list, fragment_list)`.
    pub fn initialize_fragmentation(
        &mut self,
        algorithm: AlgorithmId,
        clusters: &[ClusterId],
    ) -> PfResult<(String, String)> {
        let frame = self.open_transaction(algorithm, TransactionKind::Fragmentation, None, clusters)?;
        let original = frame.original_list.clone();
        self.recluster_frames.push(frame);

        let fragments = self.open_candidate_list(algorithm)?;
        debug!(
            algorithm = %algorithm,
            depth = self.recluster_frames.len(),
            n_clusters = clusters.len(),
            "initialized fragmentation"
        );
        Ok((original, fragments))
    }

    /// Keeps `save` and drops `delete`; the two must be the original and the
    /// fragment list of the open fragmentation.
    pub fn end_fragmentation(&mut self, algorithm: AlgorithmId, save: &str, delete: &str) -> PfResult<()> {
        let frame = self.owned_frame(algorithm, TransactionKind::Fragmentation)?;
        let names: BTreeSet<&str> = std::iter::once(frame.original_list.as_str())
            .chain(frame.candidate_lists.iter().map(String::as_str))
            .collect();
        if save == delete {
            return Err(PfError::not_allowed(format!("cannot both save and delete '{}'", save)));
        }
        for name in [save, delete] {
            if !names.contains(name) {
                return Err(PfError::not_found(format!(
                    "cluster list '{}' does not belong to this fragmentation",
                    name
                )));
            }
        }
        self.close_transaction(algorithm, TransactionKind::Fragmentation, save)
    }

    // ========================================================================
    // SHARED MACHINERY
    // ========================================================================

    fn owned_frame(&self, algorithm: AlgorithmId, kind: TransactionKind) -> PfResult<&ReclusterFrame> {
        let frame = self
            .recluster_frames
            .last()
            .ok_or_else(|| PfError::not_allowed(format!("no {} transaction is open", kind.label())))?;
        if frame.owner != algorithm {
            return Err(PfError::not_allowed(format!(
                "{} transaction is owned by {}, not {}",
                kind.label(),
                frame.owner,
                algorithm
            )));
        }
        if frame.kind != kind {
            return Err(PfError::not_allowed(format!(
                "open transaction is {}, not {}",
                frame.kind.label(),
                kind.label()
            )));
        }
        Ok(frame)
    }

    fn open_transaction(
        &mut self,
        algorithm: AlgorithmId,
        kind: TransactionKind,
        tracks: Option<&[TrackId]>,
        clusters: &[ClusterId],
    ) -> PfResult<ReclusterFrame> {
        if clusters.is_empty() {
            return Err(PfError::not_allowed(format!("{} needs at least one cluster", kind.label())));
        }
        if !self.cluster_lists.has_scope(algorithm) {
            return Err(PfError::not_found(format!("{} is not running", algorithm)));
        }

        let input_cluster_list = self.cluster_lists.current_name()?.to_string();
        let input = self.cluster_lists.list(&input_cluster_list)?;
        if let Some(missing) = clusters.iter().find(|c| !input.contains(*c)) {
            return Err(PfError::not_found(format!(
                "cluster {} is not in current list '{}'",
                missing, input_cluster_list
            )));
        }

        // Seed the snapshot from availability as currently seen, which is
        // the enclosing frame's view when nested.
        let mut seed = UsageMap::new();
        let mut hits: Vec<CaloHitId> = Vec::new();
        for &cluster in clusters {
            let c = self.registry.cluster(cluster)?;
            for hit in c.hits().chain(c.isolated_hits().iter().copied()) {
                if seed.insert(hit, self.registry.is_hit_available(hit)?).is_none() {
                    hits.push(hit);
                }
            }
        }

        let original_list = self.cluster_lists.move_subset_to_temporary_and_set_current(
            algorithm,
            &input_cluster_list,
            clusters,
        )?;

        let parent_track_list = self.track_lists.current_name()?.to_string();
        let temp_track_list = match tracks {
            Some(tracks) => Some(self.track_lists.make_temporary_with(algorithm, tracks)?),
            None => None,
        };
        let parent_hit_list = self.calo_hit_lists.current_name()?.to_string();
        let temp_hit_list = self.calo_hit_lists.make_temporary_with(algorithm, &hits)?;

        self.registry.usage.push(&original_list, seed);

        Ok(ReclusterFrame {
            owner: algorithm,
            kind,
            input_cluster_list,
            original_list,
            candidate_lists: Vec::new(),
            parent_track_list,
            parent_hit_list,
            temp_track_list,
            temp_hit_list,
        })
    }

    fn close_transaction(&mut self, algorithm: AlgorithmId, kind: TransactionKind, selected: &str) -> PfResult<()> {
        let frame = self.owned_frame(algorithm, kind)?;
        let episode: Vec<String> = std::iter::once(frame.original_list.clone())
            .chain(frame.candidate_lists.iter().cloned())
            .collect();
        if !episode.iter().any(|name| name == selected) {
            return Err(PfError::not_found(format!(
                "cluster list '{}' was not produced in this {}",
                selected,
                kind.label()
            )));
        }
        let input = frame.input_cluster_list.clone();

        // Keep the selection.
        if self.cluster_lists.contains_list(selected) {
            self.cluster_lists.save(algorithm, &input, selected, None)?;
        }

        // Everything else is inert: strip associations and retire the
        // clusters without touching availability.
        for name in episode.iter().filter(|name| *name != selected) {
            if !self.cluster_lists.contains_list(name) {
                continue;
            }
            let clusters: Vec<ClusterId> = self.cluster_lists.list(name)?.iter().copied().collect();
            self.registry.remove_all_associations_for(&clusters)?;
            for cluster in self.cluster_lists.delete_list(name)? {
                self.registry.discard_cluster(cluster)?;
            }
        }

        let committed = self.registry.usage.pop(selected)?;
        self.apply_usage(committed)?;

        let frame = self
            .recluster_frames
            .pop()
            .ok_or_else(|| PfError::not_allowed(format!("no {} transaction is open", kind.label())))?;

        self.cluster_lists.temporarily_replace_current(&frame.input_cluster_list)?;
        self.track_lists.temporarily_replace_current(&frame.parent_track_list)?;
        self.calo_hit_lists.temporarily_replace_current(&frame.parent_hit_list)?;
        if let Some(name) = &frame.temp_track_list {
            self.track_lists.delete_list(name)?;
        }
        self.calo_hit_lists.delete_list(&frame.temp_hit_list)?;

        debug!(
            algorithm = %algorithm,
            selected,
            depth = self.recluster_frames.len(),
            "ended {}",
            kind.label()
        );
        Ok(())
    }

    /// Writes a committed snapshot into the frame below, or the real flags.
    fn apply_usage(&mut self, committed: UsageMap) -> PfResult<()> {
        let nested = !self.registry.usage.is_empty();
        for (hit, available) in committed {
            if nested {
                self.registry.set_hit_available(hit, available)?;
            } else {
                self.registry.write_real_hit_availability(hit, available)?;
            }
        }
        Ok(())
    }

    /// Rolls back the innermost transaction of `algorithm` by selecting its
    /// original list.
    pub(crate) fn abort_transaction(&mut self, algorithm: AlgorithmId) -> PfResult<()> {
        let (kind, original) = match self.recluster_frames.last() {
            Some(frame) if frame.owner == algorithm => (frame.kind, frame.original_list.clone()),
            _ => return Err(PfError::not_allowed(format!("{} owns no open transaction", algorithm))),
        };
        debug!(algorithm = %algorithm, "rolling back open {}", kind.label());
        self.close_transaction(algorithm, kind, &original)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::FnAlgorithm;
    use crate::registry::tests::{hit_params, track_params};
    use crate::registry::ClusterSeed;
    use calflow_env::DetectorSettings;
    use std::collections::BTreeMap;

    /// Event with `n` hits, one input cluster per hit pair, saved as "Clusters".
    fn setup(n_hits: u32) -> (EventContext, Vec<CaloHitId>) {
        let mut ctx = EventContext::new(DetectorSettings::default());
        let hits: Vec<CaloHitId> = (0..n_hits)
            .map(|i| ctx.create_calo_hit(hit_params(i, 1800.0 + 10.0 * i as f64)).unwrap())
            .collect();
        let pairs = hits.clone();
        let mut form = FnAlgorithm::new("Form", move |ctx: &mut EventContext, id| {
            let temp = ctx.make_temporary_cluster_list(id)?;
            for pair in pairs.chunks(2) {
                ctx.create_cluster(ClusterSeed::Hits(pair.to_vec()))?;
            }
            ctx.save_cluster_list(id, "Clusters", &temp, None)?;
            ctx.replace_current_cluster_list(id, "Clusters")
        });
        ctx.run_algorithm(&mut form).unwrap();
        (ctx, hits)
    }

    fn availability(ctx: &EventContext) -> BTreeMap<CaloHitId, bool> {
        ctx.registry()
            .calo_hits()
            .map(|(id, _)| (id, ctx.registry().is_hit_available(id).unwrap()))
            .collect()
    }

    fn membership(ctx: &EventContext) -> Vec<Vec<CaloHitId>> {
        let mut out: Vec<Vec<CaloHitId>> = ctx
            .current_clusters()
            .unwrap()
            .iter()
            .map(|c| ctx.registry().cluster(*c).unwrap().hits().collect())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_noop_transaction_round_trip() {
        let (mut ctx, _) = setup(6);
        let before_availability = availability(&ctx);
        let before_membership = membership(&ctx);

        let mut alg = FnAlgorithm::new("Noop", |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            let original = ctx.initialize_reclustering(id, &[], &clusters)?;
            assert_eq!(ctx.reclustering_depth(), 1);
            ctx.end_reclustering(id, &original)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        assert_eq!(availability(&ctx), before_availability);
        assert_eq!(membership(&ctx), before_membership);
        assert_eq!(ctx.current_cluster_list_name().unwrap(), "Clusters");
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_commit_one_candidate_leaves_no_trace_of_other() {
        let (mut ctx, hits) = setup(4);
        let target = hits.clone();

        let mut alg = FnAlgorithm::new("TwoCandidates", move |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            ctx.initialize_reclustering(id, &[], &clusters)?;

            // A: one cluster from the first three hits, last hit unused.
            let first = target.clone();
            let mut a = FnAlgorithm::new("A", move |ctx: &mut EventContext, _| {
                ctx.create_cluster(ClusterSeed::Hits(first[..3].to_vec()))?;
                Ok(())
            });
            let list_a = ctx.run_clustering_algorithm(id, &mut a)?;

            // B: every hit in one cluster.
            let all = target.clone();
            let mut b = FnAlgorithm::new("B", move |ctx: &mut EventContext, _| {
                ctx.create_cluster(ClusterSeed::Hits(all.clone()))?;
                Ok(())
            });
            let list_b = ctx.run_clustering_algorithm(id, &mut b)?;
            assert_ne!(list_a, list_b);

            ctx.end_reclustering(id, &list_a)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        let state = availability(&ctx);
        assert!(!state[&hits[0]] && !state[&hits[1]] && !state[&hits[2]]);
        assert!(state[&hits[3]]);
        assert_eq!(membership(&ctx), vec![hits[..3].to_vec()]);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_end_with_foreign_list_is_not_found() {
        let (mut ctx, _) = setup(4);
        let mut alg = FnAlgorithm::new("Foreign", |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            ctx.initialize_reclustering(id, &[], &clusters)?;
            let err = ctx.end_reclustering(id, "Clusters").unwrap_err();
            assert!(matches!(err, PfError::NotFound(_)));
            Err(err)
        });
        assert!(ctx.run_algorithm(&mut alg).is_err());
        // The boundary rolled the transaction back.
        assert_eq!(ctx.reclustering_depth(), 0);
        assert_eq!(ctx.current_clusters().unwrap().len(), 2);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_initialize_rejects_bad_input() {
        let (mut ctx, _) = setup(2);
        let mut alg = FnAlgorithm::new("Bad", |ctx: &mut EventContext, id| {
            assert!(matches!(
                ctx.initialize_reclustering(id, &[], &[]),
                Err(PfError::NotAllowed(_))
            ));
            assert!(matches!(
                ctx.end_reclustering(id, "anything"),
                Err(PfError::NotAllowed(_))
            ));
            let clusters = ctx.current_clusters()?;
            ctx.drop_current_cluster_list();
            assert!(matches!(
                ctx.initialize_reclustering(id, &[], &clusters),
                Err(PfError::NotFound(_))
            ));
            Ok(())
        });
        ctx.run_algorithm(&mut alg).unwrap();
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_track_associations_survive_only_in_selection() {
        let (mut ctx, hits) = setup(4);
        let track = ctx.create_track(track_params(2.0)).unwrap();
        let first = ctx.current_clusters().unwrap()[0];
        ctx.add_track_cluster_association(track, first).unwrap();
        let target = hits.clone();

        let mut alg = FnAlgorithm::new("Reassociate", move |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            ctx.initialize_reclustering(id, &[track], &clusters)?;
            assert_eq!(ctx.track_lists().current_objects()?, vec![track]);

            let all = target.clone();
            let mut merge_all = FnAlgorithm::new("All", move |ctx: &mut EventContext, _| {
                let c = ctx.create_cluster(ClusterSeed::Hits(all.clone()))?;
                ctx.add_track_cluster_association(track, c)
            });
            let list = ctx.run_clustering_algorithm(id, &mut merge_all)?;
            ctx.end_reclustering(id, &list)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        let clusters = ctx.current_clusters().unwrap();
        assert_eq!(clusters.len(), 1);
        let t = ctx.registry().track(track).unwrap();
        assert_eq!(t.associated_clusters().iter().copied().collect::<Vec<_>>(), clusters);
        assert_eq!(ctx.track_lists().current_name().unwrap(), crate::list_store::INPUT_LIST_NAME);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_nested_transaction_commits_into_outer_snapshot() {
        let (mut ctx, hits) = setup(4);
        let target = hits.clone();

        let mut outer = FnAlgorithm::new("Outer", move |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            ctx.initialize_reclustering(id, &[], &clusters)?;

            let inner_hits = target.clone();
            let mut candidate = FnAlgorithm::new("Candidate", move |ctx: &mut EventContext, _| {
                ctx.create_cluster(ClusterSeed::Hits(inner_hits[..2].to_vec()))?;
                ctx.create_cluster(ClusterSeed::Hits(inner_hits[2..].to_vec()))?;

                // Sub-reclustering of the candidate's first cluster: split it.
                let first = ctx.current_clusters()?[0];
                let split_hits = inner_hits[..2].to_vec();
                let mut nested = FnAlgorithm::new("Nested", move |ctx: &mut EventContext, nid| {
                    ctx.initialize_reclustering(nid, &[], &[first])?;
                    assert_eq!(ctx.reclustering_depth(), 2);
                    let halves = split_hits.clone();
                    let mut split = FnAlgorithm::new("Split", move |ctx: &mut EventContext, _| {
                        ctx.create_cluster(ClusterSeed::Hit(halves[0]))?;
                        Ok(())
                    });
                    let list = ctx.run_clustering_algorithm(nid, &mut split)?;
                    ctx.end_reclustering(nid, &list)
                });
                ctx.run_algorithm(&mut nested)
            });
            let list = ctx.run_clustering_algorithm(id, &mut candidate)?;
            assert_eq!(ctx.current_clusters()?.len(), 2);
            ctx.end_reclustering(id, &list)
        });
        ctx.run_algorithm(&mut outer).unwrap();

        let state = availability(&ctx);
        assert!(!state[&hits[0]]);
        // Dropped by the nested commit.
        assert!(state[&hits[1]]);
        assert!(!state[&hits[2]] && !state[&hits[3]]);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_child_view_of_original_reverts_with_scope() {
        let (mut ctx, hits) = setup(4);
        let target = hits.clone();

        let mut alg = FnAlgorithm::new("Owner", move |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            let original = ctx.initialize_reclustering(id, &[], &clusters)?;
            let mut empty = FnAlgorithm::new("Empty", |_: &mut EventContext, _| Ok(()));
            let candidate = ctx.run_clustering_algorithm(id, &mut empty)?;

            let first = target[0];
            let mut look = FnAlgorithm::new("Look", move |ctx: &mut EventContext, _| {
                ctx.temporarily_replace_current_cluster_list(&original)?;
                assert_eq!(ctx.current_clusters()?.len(), 2);
                assert!(!ctx.registry().is_hit_available(first)?);
                Ok(())
            });
            ctx.run_algorithm(&mut look)?;

            assert_eq!(ctx.current_cluster_list_name()?, candidate);
            let all = ctx.registry().calo_hits().map(|(h, _)| h).collect::<Vec<_>>();
            assert!(all.iter().all(|h| ctx.registry().is_hit_available(*h).unwrap()));
            ctx.create_cluster(ClusterSeed::Hits(all))?;
            ctx.end_reclustering(id, &candidate)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        let state = availability(&ctx);
        assert!(hits.iter().all(|h| !state[h]));
        assert_eq!(membership(&ctx).len(), 1);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_fragmentation_keeps_fragments() {
        let (mut ctx, hits) = setup(4);
        let target = hits.clone();

        let mut alg = FnAlgorithm::new("Fragment", move |ctx: &mut EventContext, id| {
            let first = ctx.current_clusters()?[0];
            let (original, fragments) = ctx.initialize_fragmentation(id, &[first])?;
            assert_eq!(ctx.current_cluster_list_name()?, fragments);
            ctx.create_cluster(ClusterSeed::Hit(target[0]))?;
            ctx.create_cluster(ClusterSeed::Hit(target[1]))?;
            assert!(matches!(
                ctx.end_fragmentation(id, &fragments, "Clusters"),
                Err(PfError::NotFound(_))
            ));
            ctx.end_fragmentation(id, &fragments, &original)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        assert_eq!(ctx.current_clusters().unwrap().len(), 3);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn test_failing_candidate_rolls_back() {
        let (mut ctx, _) = setup(4);
        let before = availability(&ctx);

        let mut alg = FnAlgorithm::new("Failing", |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            ctx.initialize_reclustering(id, &[], &clusters)?;
            let mut bad = FnAlgorithm::new("Bad", |_: &mut EventContext, _| {
                Err(PfError::failure("candidate gave up"))
            });
            ctx.run_clustering_algorithm(id, &mut bad)?;
            Ok(())
        });
        let err = ctx.run_algorithm(&mut alg).unwrap_err();
        assert!(matches!(err, PfError::Failure(_)));

        assert_eq!(availability(&ctx), before);
        assert_eq!(ctx.current_clusters().unwrap().len(), 2);
        ctx.check_invariants().unwrap();
    }
}
