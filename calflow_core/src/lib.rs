//! CalFlow Core - Particle-Flow Reconstruction Framework
//!
//! Reconstructs particle flow objects from calorimeter hits and tracks, one
//! event at a time, while guaranteeing that:
//! 1. **Ownership**: every hit belongs to at most one cluster, and its
//!    availability flag always says so
//! 2. **Scoping**: temporary lists an algorithm creates disappear when it
//!    returns, whether it succeeded, failed or panicked
//! 3. **Rollback**: reclustering transactions try several partitions and
//!    commit exactly one, leaving no trace of the others
//!
//! The fragment-removal engine builds on all three to merge shower fragments
//! back into their charged parents.

pub mod algorithm;
pub mod algorithms;
pub mod arena;
pub mod context;
pub mod error;
pub mod fragment;
pub mod helix;
pub mod host;
pub mod list_store;
pub mod objects;
pub mod physics;
mod recluster;
pub mod registry;
pub mod settings;
mod usage;

// Re-export key types for convenience
pub use algorithm::{Algorithm, AlgorithmFactory, FnAlgorithm};
pub use arena::{Arena, Handle};
pub use context::EventContext;
pub use error::{PfError, PfResult};
pub use fragment::{ClusterContact, FragmentRemoval, FragmentRemovalConfig, FragmentRemovalEngine, MergeRecord};
pub use helix::Helix;
pub use host::Reconstruction;
pub use list_store::{AlgorithmId, ListStore, Ownership, INPUT_LIST_NAME, NULL_LIST_NAME};
pub use objects::{
    CaloHit, CaloHitId, CaloHitParameters, Cluster, ClusterId, HitKind, Pfo, PfoId, PfoParameters, Track, TrackId,
    TrackParameters, TrackState,
};
pub use registry::{ClusterSeed, Registry};
