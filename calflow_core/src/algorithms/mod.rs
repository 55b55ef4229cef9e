//! Built-in algorithm types.

mod clustering_parent;
mod pfo_creation;
mod proximity_clustering;
mod reclustering;
mod track_association;

pub use clustering_parent::ClusteringParent;
pub use pfo_creation::{PfoCreation, PfoCreationConfig, NEUTRON, PHOTON, PI_PLUS};
pub use proximity_clustering::{ProximityClustering, ProximityClusteringConfig};
pub use reclustering::{ReclusteringConfig, TrackDrivenReclustering};
pub use track_association::{TrackClusterAssociation, TrackClusterAssociationConfig};

use crate::algorithm::AlgorithmFactory;
use crate::fragment::FragmentRemoval;
use calflow_env::AlgorithmConfig;

pub(crate) fn register_builtin(factory: &mut AlgorithmFactory) {
    factory.insert("ProximityClustering", || Box::new(ProximityClustering::default()));
    factory.insert("TrackClusterAssociation", || Box::new(TrackClusterAssociation::default()));
    factory.insert("ClusteringParent", || Box::new(ClusteringParent::default()));
    factory.insert("TrackDrivenReclustering", || Box::new(TrackDrivenReclustering::default()));
    factory.insert("FragmentRemoval", || Box::new(FragmentRemoval::default()));
    factory.insert("PfoCreation", || Box::new(PfoCreation::default()));
}

/// The standard pipeline: cluster and associate, recluster poorly matched
/// clusters, remove fragments, build pfos.
pub fn standard_pipeline() -> Vec<AlgorithmConfig> {
    let association = AlgorithmConfig::new("TrackClusterAssociation");
    vec![
        AlgorithmConfig::new("ClusteringParent")
            .with_daughter("Clustering", AlgorithmConfig::new("ProximityClustering"))
            .with_daughter("Association", association.clone())
            .with_parameter("ClusterListName", "PrimaryClusters"),
        AlgorithmConfig::new("TrackDrivenReclustering")
            .with_daughter_list(
                "ClusteringAlgorithms",
                vec![
                    AlgorithmConfig::new("ProximityClustering").with_parameter("MaxHitDistance", 50.0),
                    AlgorithmConfig::new("ProximityClustering")
                        .with_parameter("MaxHitDistance", 120.0)
                        .with_parameter("MaxLayerGap", 3),
                ],
            )
            .with_daughter("Association", association),
        AlgorithmConfig::new("FragmentRemoval"),
        AlgorithmConfig::new("PfoCreation").with_parameter("OutputPfoListName", "OutputPfos"),
    ]
}
