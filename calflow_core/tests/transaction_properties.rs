//! Property tests for hit ownership and reclustering transactions.

use std::collections::BTreeMap;

use calflow_core::{
    CaloHitId, CaloHitParameters, ClusterId, ClusterSeed, EventContext, FnAlgorithm, HitKind, PfResult,
};
use calflow_env::DetectorSettings;
use nalgebra::Vector3;
use proptest::prelude::*;

const N_HITS: usize = 12;

fn hit(i: usize) -> CaloHitParameters {
    CaloHitParameters {
        position: Vector3::new(1800.0 + 10.0 * i as f64, 0.0, 0.0),
        expected_direction: Vector3::new(1.0, 0.0, 0.0),
        cell_size: 10.0,
        input_energy: 0.2,
        em_energy: 0.1,
        hadronic_energy: 0.2,
        mip_equivalent_energy: 1.0,
        layer: i as u32,
        hit_kind: HitKind::Ecal,
        time: 0.0,
    }
}

fn event() -> (EventContext, Vec<CaloHitId>) {
    let mut ctx = EventContext::new(DetectorSettings::default());
    let hits = (0..N_HITS).map(|i| ctx.create_calo_hit(hit(i)).unwrap()).collect();
    (ctx, hits)
}

/// (hits flagged unavailable, live hit-in-cluster memberships)
fn ownership_counts(ctx: &EventContext) -> (usize, usize) {
    let registry = ctx.registry();
    let unavailable = registry
        .calo_hits()
        .filter(|(id, _)| !registry.is_hit_available(*id).unwrap())
        .count();
    let memberships = registry.clusters().map(|(_, c)| c.n_hits() + c.n_isolated_hits()).sum();
    (unavailable, memberships)
}

fn availability(ctx: &EventContext) -> BTreeMap<CaloHitId, bool> {
    let registry = ctx.registry();
    registry
        .calo_hits()
        .map(|(id, _)| (id, registry.is_hit_available(id).unwrap()))
        .collect()
}

fn membership(ctx: &EventContext) -> Vec<Vec<CaloHitId>> {
    let registry = ctx.registry();
    let mut out: Vec<Vec<CaloHitId>> = ctx
        .current_clusters()
        .unwrap()
        .iter()
        .map(|c| registry.cluster(*c).unwrap().hits().collect())
        .collect();
    out.sort();
    out
}

/// Groups `hits` by `labels` and creates one cluster per group.
fn create_partition(ctx: &mut EventContext, hits: &[CaloHitId], labels: &[u8]) -> PfResult<Vec<ClusterId>> {
    let mut groups: BTreeMap<u8, Vec<CaloHitId>> = BTreeMap::new();
    for (hit, label) in hits.iter().zip(labels) {
        groups.entry(*label).or_default().push(*hit);
    }
    groups
        .into_values()
        .map(|group| ctx.create_cluster(ClusterSeed::Hits(group)))
        .collect()
}

/// Event whose hits are partitioned by `labels` into clusters saved as "Clusters".
fn clustered_event(labels: &[u8]) -> (EventContext, Vec<CaloHitId>) {
    let (mut ctx, hits) = event();
    let seeds = hits.clone();
    let labels = labels.to_vec();
    let mut form = FnAlgorithm::new("Form", move |ctx: &mut EventContext, id| {
        let temp = ctx.make_temporary_cluster_list(id)?;
        create_partition(ctx, &seeds, &labels)?;
        ctx.save_cluster_list(id, "Clusters", &temp, None)?;
        ctx.replace_current_cluster_list(id, "Clusters")
    });
    ctx.run_algorithm(&mut form).unwrap();
    (ctx, hits)
}

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    AddHit(usize, usize),
    RemoveHit(usize, usize),
    Merge(usize, usize),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..N_HITS).prop_map(Op::Create),
        (0..N_HITS, 0..8usize).prop_map(|(h, c)| Op::AddHit(h, c)),
        (0..N_HITS, 0..8usize).prop_map(|(h, c)| Op::RemoveHit(h, c)),
        (0..8usize, 0..8usize).prop_map(|(a, b)| Op::Merge(a, b)),
        (0..8usize).prop_map(Op::Delete),
    ]
}

fn pick(clusters: &[ClusterId], i: usize) -> Option<ClusterId> {
    (!clusters.is_empty()).then(|| clusters[i % clusters.len()])
}

fn apply(ctx: &mut EventContext, hits: &[CaloHitId], clusters: &mut Vec<ClusterId>, op: &Op) {
    // Rejected operations are part of the property: they must leave no trace.
    match *op {
        Op::Create(h) => {
            if let Ok(c) = ctx.create_cluster(ClusterSeed::Hit(hits[h])) {
                clusters.push(c);
            }
        }
        Op::AddHit(h, c) => {
            if let Some(c) = pick(clusters, c) {
                let _ = ctx.add_hit_to_cluster(c, hits[h]);
            }
        }
        Op::RemoveHit(h, c) => {
            if let Some(c) = pick(clusters, c) {
                let _ = ctx.remove_hit_from_cluster(c, hits[h]);
            }
        }
        Op::Merge(a, b) => {
            if let (Some(a), Some(b)) = (pick(clusters, a), pick(clusters, b)) {
                if a != b && ctx.merge_and_delete_clusters(a, b).is_ok() {
                    clusters.retain(|c| *c != b);
                }
            }
        }
        Op::Delete(c) => {
            if let Some(c) = pick(clusters, c) {
                if ctx.delete_cluster(c).is_ok() {
                    clusters.retain(|x| *x != c);
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_availability_conservation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut ctx, hits) = event();
        let mut observed = Vec::new();
        let mut alg = FnAlgorithm::new("Random", |ctx: &mut EventContext, id| {
            ctx.make_temporary_cluster_list(id)?;
            let mut clusters = Vec::new();
            for op in &ops {
                apply(ctx, &hits, &mut clusters, op);
                let empty = ctx.registry().clusters().filter(|(_, c)| c.is_empty()).count();
                observed.push((ownership_counts(ctx), empty));
            }
            Ok(())
        });
        ctx.run_algorithm(&mut alg).unwrap();
        drop(alg);

        for ((unavailable, memberships), empty) in observed {
            prop_assert_eq!(unavailable, memberships);
            prop_assert_eq!(empty, 0);
        }
        // Teardown returned every hit.
        prop_assert_eq!(ownership_counts(&ctx), (0, 0));
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn prop_noop_reclustering_round_trip(
        labels in prop::collection::vec(0u8..4, N_HITS),
        candidate in prop::collection::vec(0u8..6, N_HITS),
    ) {
        let (mut ctx, _) = clustered_event(&labels);
        let before_availability = availability(&ctx);
        let before_membership = membership(&ctx);

        let mut alg = FnAlgorithm::new("TryAndRevert", move |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            let original = ctx.initialize_reclustering(id, &[], &clusters)?;
            let labels = candidate.clone();
            let mut repartition = FnAlgorithm::new("Repartition", move |ctx: &mut EventContext, _| {
                let hits = ctx.calo_hit_lists().current_objects()?;
                create_partition(ctx, &hits, &labels).map(|_| ())
            });
            ctx.run_clustering_algorithm(id, &mut repartition)?;
            ctx.end_reclustering(id, &original)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        prop_assert_eq!(availability(&ctx), before_availability);
        prop_assert_eq!(membership(&ctx), before_membership);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn prop_commit_reflects_selected_candidate_only(
        labels in prop::collection::vec(0u8..3, N_HITS),
        first in prop::collection::vec(0u8..4, N_HITS),
        second in prop::collection::vec(0u8..2, N_HITS / 2),
    ) {
        let (mut ctx, _) = clustered_event(&labels);

        let mut alg = FnAlgorithm::new("PickFirst", move |ctx: &mut EventContext, id| {
            let clusters = ctx.current_clusters()?;
            ctx.initialize_reclustering(id, &[], &clusters)?;

            let first_labels = first.clone();
            let mut a = FnAlgorithm::new("A", move |ctx: &mut EventContext, _| {
                let hits = ctx.calo_hit_lists().current_objects()?;
                create_partition(ctx, &hits, &first_labels).map(|_| ())
            });
            let chosen = ctx.run_clustering_algorithm(id, &mut a)?;

            // B claims only half of the hits.
            let second_labels = second.clone();
            let mut b = FnAlgorithm::new("B", move |ctx: &mut EventContext, _| {
                let hits = ctx.calo_hit_lists().current_objects()?;
                create_partition(ctx, &hits[..hits.len() / 2], &second_labels).map(|_| ())
            });
            ctx.run_clustering_algorithm(id, &mut b)?;

            ctx.end_reclustering(id, &chosen)
        });
        ctx.run_algorithm(&mut alg).unwrap();

        // A used every hit, so none may look available afterwards.
        prop_assert!(availability(&ctx).values().all(|available| !available));
        let total: usize = membership(&ctx).iter().map(Vec::len).sum();
        prop_assert_eq!(total, N_HITS);
        ctx.check_invariants().unwrap();
    }
}
